mod exports;
mod progress;
mod styling;
mod summary;
mod tables;
mod timeline;

pub use exports::{export_matrix, render_html};
pub use progress::PhaseProgress;
pub use styling::{dim, magenta_bold};
pub use summary::print_summary;
pub use timeline::{print_timeline, render_svg};

/// Prints the `cisummary` banner to stderr.
pub fn print_banner() {
    eprintln!(
        r"
{} {}
  {}
",
        magenta_bold("◉ cisummary"),
        dim(env!("CARGO_PKG_VERSION")),
        dim("CircleCI status matrix & job timelines")
    );
}
