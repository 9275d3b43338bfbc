mod plan;
mod progress;
mod styling;
mod summary;
mod tables;

pub use plan::{print_plan, PlanEntry};
pub use progress::StageProgress;
pub use styling::{dim, magenta_bold};
pub use summary::print_summary;

/// Prints the `cirun` banner to stderr.
///
/// Displays the tool name, version, and description at the start of execution.
pub fn print_banner() {
    eprintln!(
        r"
{} {}
  {}
",
        magenta_bold("🛠 cirun"),
        dim(env!("CARGO_PKG_VERSION")),
        dim("Declarative CI Pipeline Runner")
    );
}

/// Prints a job's captured output to stderr, set off from the run summary.
pub fn print_job_output(job: &str, text: &str) {
    eprintln!("{}", dim(format!("── output of '{job}' ──")));
    eprint!("{text}");
    if !text.ends_with('\n') {
        eprintln!();
    }
}
