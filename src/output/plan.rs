use comfy_table::{Cell, Color as TableColor};
use serde::Serialize;

use crate::pipeline::model::Job;
use crate::pipeline::rules::Verdict;

use super::tables::{create_table, header_cells};

/// One row of the `plan` output, serializable for `--output`.
#[derive(Debug, Serialize)]
pub struct PlanEntry {
    pub job: String,
    pub stage: String,
    pub image: Option<String>,
    pub action: String,
}

impl PlanEntry {
    pub fn new(job: &Job, verdict: &Verdict) -> Self {
        let action = match verdict {
            Verdict::Run => "run".to_string(),
            Verdict::Skip(reason) => format!("skip: {reason}"),
        };
        Self {
            job: job.name.clone(),
            stage: job.stage.clone(),
            image: job.image.clone(),
            action,
        }
    }
}

/// Prints the verdict table for a `plan` invocation to stdout.
pub fn print_plan(entries: &[PlanEntry]) {
    println!("{}", render_plan(entries));
}

fn render_plan(entries: &[PlanEntry]) -> String {
    let mut table = create_table();
    table.set_header(header_cells(&["Stage", "Job", "Image", "Action"]));

    for entry in entries {
        let action_cell = if entry.action == "run" {
            Cell::new(&entry.action).fg(TableColor::Green)
        } else {
            Cell::new(&entry.action).fg(TableColor::DarkGrey)
        };
        table.add_row(vec![
            Cell::new(&entry.stage),
            Cell::new(&entry.job),
            Cell::new(entry.image.as_deref().unwrap_or("-")),
            action_cell,
        ]);
    }

    table.to_string()
}
