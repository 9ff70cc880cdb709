use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use super::styling::{bright, bright_green, bright_yellow};

/// Progress tracking for the crawl and aggregation phases
pub struct PhaseProgress {
    pb: ProgressBar,
}

impl PhaseProgress {
    pub fn start_crawl() -> Self {
        eprintln!("{}  {}", bright("⚙️"), bright("Phases").underlined());
        let pb = create_spinner(bright_yellow("Phase 1/2: Crawling pipelines").to_string());
        Self { pb }
    }

    /// Spinner handle the crawler updates with its task counts.
    pub fn bar(&self) -> ProgressBar {
        self.pb.clone()
    }

    pub fn finish_crawl_start_aggregate(self, requests: usize) -> Self {
        self.pb.finish_with_message(
            bright_green(format!("Phase 1/2: Crawled pipelines ({requests} requests) ✓"))
                .to_string(),
        );
        let pb = create_spinner(bright_yellow("Phase 2/2: Building status matrix").to_string());
        Self { pb }
    }

    pub fn finish_aggregate(self) {
        self.pb
            .finish_with_message(bright_green("Phase 2/2: Status matrix built ✓").to_string());
        eprintln!();
    }
}

fn create_spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_draw_target(ProgressDrawTarget::stderr());
    if let Ok(style) =
        ProgressStyle::default_spinner().template("  {msg} {spinner} {prefix:.dim}")
    {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}
