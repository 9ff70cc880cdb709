use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color as TableColor, ContentArrangement, Table};

use crate::providers::circleci::types::Status;

/// Table and cell creation helpers
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn cyan_header(labels: &[&str]) -> Vec<Cell> {
    labels
        .iter()
        .map(|label| Cell::new(*label).fg(TableColor::Cyan))
        .collect()
}

/// One-glyph rendering of a status; unknown statuses show their first two
/// characters.
pub fn status_symbol(status: &Status) -> String {
    let symbol = match status {
        Status::Success => "✓",
        Status::Failed => "✗",
        Status::Canceled => "⊘",
        Status::Running => "▶",
        Status::OnHold => "⏸",
        Status::Blocked => "…",
        Status::Queued => "◷",
        Status::Unauthorized => "!",
        Status::NotRunning => "·",
        Status::Unknown(raw) => return raw.chars().take(2).collect(),
    };
    symbol.to_string()
}

pub fn status_color(status: &Status) -> TableColor {
    match status {
        Status::Success => TableColor::Green,
        Status::Failed | Status::Unauthorized => TableColor::Red,
        Status::Running => TableColor::Blue,
        Status::OnHold => TableColor::Magenta,
        _ => TableColor::DarkGrey,
    }
}

pub fn status_cell(status: &Status) -> Cell {
    Cell::new(status_symbol(status)).fg(status_color(status))
}

/// Durations of unfinished workflows are dimmed.
pub fn duration_cell(duration: Option<&str>, running: bool) -> Cell {
    let cell = Cell::new(duration.unwrap_or("—"));
    if running {
        cell.fg(TableColor::DarkGrey)
    } else {
        cell
    }
}
