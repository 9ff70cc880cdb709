use std::fmt::Write;

use comfy_table::Cell;

use crate::providers::circleci::timeline::Chart;
use crate::providers::circleci::types::Status;
use crate::report::format_duration;

use super::styling::{abbreviate, bright, dim};
use super::tables::{create_table, cyan_header, status_cell};

const ROW_HEIGHT: f64 = 28.0;
const ROW_MARGIN: f64 = 0.03 * ROW_HEIGHT;
const CHART_WIDTH: f64 = 1200.0;
const AXIS_HEIGHT: f64 = 20.0;

fn fill(status: &Status) -> &'static str {
    match status {
        Status::Success => "#43a047",
        Status::Failed | Status::Unauthorized => "#e53935",
        Status::Running => "#1e88e5",
        Status::OnHold => "#8e7cc3",
        _ => "#9e9e9e",
    }
}

/// Renders a job timeline as SVG.
///
/// x is minutes since the earliest job start; each packed row unit is one
/// band of [`ROW_HEIGHT`] pixels. Gridlines every minute, labelled every
/// two.
pub fn render_svg(chart: &Chart, title: &str) -> String {
    let span = if chart.span_minutes > 0.0 {
        chart.span_minutes
    } else {
        1.0
    };
    let scale = CHART_WIDTH / span;
    #[allow(clippy::cast_precision_loss)]
    let plot_height = chart.height.max(1) as f64 * ROW_HEIGHT;
    let total_height = plot_height + AXIS_HEIGHT;

    let mut svg = String::new();
    let _ = writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{CHART_WIDTH}" height="{total_height}" viewBox="0 0 {CHART_WIDTH} {total_height}" font-family="sans-serif" font-size="11">"#
    );
    let _ = writeln!(svg, "  <title>{}</title>", escape(title));

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let minutes = span.ceil() as u64;
    for minute in 0..=minutes {
        #[allow(clippy::cast_precision_loss)]
        let x = minute as f64 * scale;
        let opacity = if minute % 2 == 0 { 0.4 } else { 0.15 };
        let _ = writeln!(
            svg,
            r##"  <line x1="{x:.1}" y1="0" x2="{x:.1}" y2="{plot_height}" stroke="#333" stroke-opacity="{opacity}"/>"##
        );
        if minute % 2 == 0 {
            let _ = writeln!(
                svg,
                r#"  <text x="{x:.1}" y="{:.1}" text-anchor="middle">{minute}</text>"#,
                plot_height + AXIS_HEIGHT - 5.0
            );
        }
    }

    for bar in &chart.bars {
        let x = bar.start_minutes * scale;
        let width = ((bar.end_minutes - bar.start_minutes) * scale).max(1.0);
        #[allow(clippy::cast_precision_loss)]
        let y = bar.rows.start as f64 * ROW_HEIGHT + ROW_MARGIN;
        #[allow(clippy::cast_precision_loss)]
        let height = bar.rows.span() as f64 * ROW_HEIGHT - 2.0 * ROW_MARGIN;

        #[allow(clippy::cast_possible_truncation)]
        let seconds = ((bar.end_minutes - bar.start_minutes) * 60.0).round() as i64;
        let _ = writeln!(svg, r#"  <g id="job-{}">"#, escape(&bar.job_id));
        let _ = writeln!(
            svg,
            "    <title>{} ({}, {})</title>",
            escape(&bar.name),
            bar.status,
            format_duration(seconds)
        );
        let _ = writeln!(
            svg,
            r#"    <rect x="{x:.1}" y="{y:.1}" width="{width:.1}" height="{height:.1}" fill="{}"/>"#,
            fill(&bar.status)
        );
        let _ = writeln!(
            svg,
            r#"    <text x="{:.1}" y="{:.1}" text-anchor="middle" dominant-baseline="middle">{}</text>"#,
            x + width / 2.0,
            y + height / 2.0,
            escape(&abbreviate(&bar.name))
        );
        let _ = writeln!(svg, "  </g>");
    }

    let _ = writeln!(svg, "</svg>");
    svg
}

/// Prints the row assignment of every bar as a table.
pub fn print_timeline(chart: &Chart, title: &str) {
    println!("{}", render_table(chart, title));
}

fn render_table(chart: &Chart, title: &str) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "{} {}", bright("🕒"), bright(title).underlined());

    let mut table = create_table();
    table.set_header(cyan_header(&[
        "Rows", "#", "Job", "After", "Status", "Start", "End", "Duration",
    ]));
    for bar in &chart.bars {
        #[allow(clippy::cast_possible_truncation)]
        let seconds = ((bar.end_minutes - bar.start_minutes) * 60.0).round() as i64;
        table.add_row(vec![
            Cell::new(format!("{}–{}", bar.rows.start, bar.rows.end)),
            Cell::new(bar.job_number.map(|n| n.to_string()).unwrap_or_default()),
            Cell::new(&bar.name),
            Cell::new(bar.after.as_deref().unwrap_or("")),
            status_cell(&bar.status),
            Cell::new(format!("{:.1}m", bar.start_minutes)),
            Cell::new(format!("{:.1}m", bar.end_minutes)),
            Cell::new(format_duration(seconds)),
        ]);
    }
    let _ = writeln!(output, "{table}");
    let _ = writeln!(
        output,
        "  {}",
        dim(format!(
            "{} rows, {:.1} minutes",
            chart.height, chart.span_minutes
        ))
    );
    output
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
