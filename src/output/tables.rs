use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color as TableColor, ContentArrangement, Table};

use crate::report::JobStatus;

/// Table and cell creation helpers
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn header_cells(labels: &[&str]) -> Vec<Cell> {
    labels
        .iter()
        .map(|label| Cell::new(*label).fg(TableColor::Cyan))
        .collect()
}

pub fn status_cell(status: JobStatus) -> Cell {
    let color = match status {
        JobStatus::Success => TableColor::Green,
        JobStatus::Failed => TableColor::Red,
        JobStatus::Skipped => TableColor::DarkGrey,
        JobStatus::Manual => TableColor::Yellow,
    };
    Cell::new(status.as_str()).fg(color)
}

pub fn duration_cell(seconds: f64) -> Cell {
    Cell::new(format_duration(seconds))
}

/// Short human duration: sub-minute in seconds, longer in minutes.
pub fn format_duration(seconds: f64) -> String {
    if seconds < 90.0 {
        format!("{seconds:.1}s")
    } else {
        format!("{:.1}min", seconds / 60.0)
    }
}
