use comfy_table::Cell;

use crate::report::{JobStatus, PipelineReport};

use super::styling::{bright, bright_green, bright_red, cyan, dim};
use super::tables::{create_table, duration_cell, format_duration, header_cells, status_cell};

/// Prints a human-readable summary of a pipeline run to stdout.
///
/// Displays an overview block (project, ref, source, duration, status)
/// followed by a table of every job with its stage, status, duration,
/// attempts and skip/failure note.
pub fn print_summary(report: &PipelineReport) {
    println!("{}", render_summary(report));
}

fn add_section_header(output: &mut String, emoji: &str, title: &str) {
    output.push_str(&format!("{} {}\n", bright(emoji), bright(title).underlined()));
}

fn render_summary(report: &PipelineReport) -> String {
    let mut output = String::new();

    add_section_header(&mut output, "📊", "Pipeline");

    let ref_display = if report.tag {
        format!("{} (tag)", report.ref_name)
    } else {
        report.ref_name.clone()
    };

    let status_display = match report.status {
        JobStatus::Failed => bright_red("failed"),
        _ => bright_green("success"),
    };

    output.push_str(&format!(
        "  {} {}\n  {} {}\n  {} {}\n  {} {}\n  {} {}\n  {} {}\n\n",
        dim("Project:"),
        cyan(&report.project),
        dim("Ref:"),
        cyan(ref_display),
        dim("Source:"),
        cyan(report.source.as_str()),
        dim("Started:"),
        dim(report.started_at.format("%Y-%m-%d %H:%M:%S UTC")),
        dim("Duration:"),
        cyan(format_duration(report.duration_secs)),
        dim("Status:"),
        status_display
    ));

    if report.stages.is_empty() {
        output.push_str(&format!("{}\n", dim("No jobs selected for this run.")));
        return output;
    }

    add_section_header(&mut output, "🧱", "Jobs");

    let mut table = create_table();
    table.set_header(header_cells(&[
        "Stage", "Job", "Status", "Duration", "Attempts", "Note",
    ]));

    for stage in &report.stages {
        for job in &stage.jobs {
            let attempts = if job.attempts > 0 {
                job.attempts.to_string()
            } else {
                "-".to_string()
            };
            table.add_row(vec![
                Cell::new(&stage.name),
                Cell::new(&job.name),
                status_cell(job.status),
                duration_cell(job.duration_secs),
                Cell::new(attempts),
                Cell::new(job.reason.as_deref().unwrap_or("")),
            ]);
        }
    }

    output.push_str(&format!("{table}\n"));

    let failed: Vec<&str> = report
        .stages
        .iter()
        .flat_map(|stage| &stage.jobs)
        .filter(|job| job.status == JobStatus::Failed && !job.allow_failure)
        .map(|job| job.name.as_str())
        .collect();

    if !failed.is_empty() {
        output.push_str(&format!(
            "\n{} {}\n",
            bright_red("Failed jobs:"),
            failed.join(", ")
        ));
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::context::TriggerSource;
    use crate::report::{JobReport, StageReport};
    use chrono::Utc;

    fn job(name: &str, status: JobStatus, reason: Option<&str>) -> JobReport {
        JobReport {
            name: name.to_string(),
            stage: "test".to_string(),
            status,
            duration_secs: 4.2,
            exit_code: Some(0),
            attempts: u32::from(status != JobStatus::Skipped),
            allow_failure: false,
            image: None,
            reason: reason.map(ToString::to_string),
        }
    }

    fn report(status: JobStatus, stages: Vec<StageReport>) -> PipelineReport {
        PipelineReport {
            project: "demo-project".to_string(),
            ref_name: "main".to_string(),
            tag: false,
            source: TriggerSource::Push,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            duration_secs: 12.5,
            status,
            stages,
        }
    }

    #[test]
    fn test_render_summary_overview() {
        let stages = vec![StageReport {
            name: "test".to_string(),
            status: JobStatus::Success,
            jobs: vec![job("unit", JobStatus::Success, None)],
        }];

        let output = render_summary(&report(JobStatus::Success, stages));

        assert!(output.contains("demo-project"));
        assert!(output.contains("main"));
        assert!(output.contains("push"));
        assert!(output.contains("12.5s"));
        assert!(output.contains("success"));
        assert!(output.contains("unit"));
    }

    #[test]
    fn test_render_summary_empty_run() {
        let output = render_summary(&report(JobStatus::Success, vec![]));
        assert!(output.contains("No jobs selected"));
    }

    #[test]
    fn test_render_summary_lists_failed_jobs() {
        let stages = vec![StageReport {
            name: "test".to_string(),
            status: JobStatus::Failed,
            jobs: vec![
                job("unit", JobStatus::Success, None),
                job("lint", JobStatus::Failed, Some("command failed with exit code 1: make lint")),
            ],
        }];

        let output = render_summary(&report(JobStatus::Failed, stages));

        assert!(output.contains("Failed jobs:"));
        assert!(output.contains("lint"));
        assert!(output.contains("command failed with exit code 1"));
    }

    #[test]
    fn test_render_summary_shows_skip_reasons() {
        let stages = vec![StageReport {
            name: "test".to_string(),
            status: JobStatus::Skipped,
            jobs: vec![job("release", JobStatus::Skipped, Some("no 'only' pattern matches"))],
        }];

        let output = render_summary(&report(JobStatus::Success, stages));

        assert!(output.contains("release"));
        assert!(output.contains("no 'only' pattern matches"));
        // Skipped jobs show no attempt count
        assert!(output.contains('-'));
    }

    #[test]
    fn test_render_summary_marks_tag_refs() {
        let mut report = report(JobStatus::Success, vec![]);
        report.ref_name = "v1.2.0".to_string();
        report.tag = true;

        let output = render_summary(&report);
        assert!(output.contains("v1.2.0 (tag)"));
    }
}
