use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::report::JobStatus;

use super::styling::{bright_green, bright_red, bright_yellow, dim};

/// Spinner shown while a stage is executing.
pub struct StageProgress {
    pb: ProgressBar,
    label: String,
}

impl StageProgress {
    pub fn start(name: &str, index: usize, total: usize) -> Self {
        let label = format!("Stage {index}/{total}: {name}");
        let pb = create_spinner(bright_yellow(format!("{label} running")).to_string());
        Self { pb, label }
    }

    pub fn finish(self, status: JobStatus) {
        let message = match status {
            JobStatus::Success => bright_green(format!("{} ✓", self.label)).to_string(),
            JobStatus::Failed => bright_red(format!("{} ✗", self.label)).to_string(),
            JobStatus::Skipped | JobStatus::Manual => {
                dim(format!("{} (skipped)", self.label)).to_string()
            }
        };
        self.pb.finish_with_message(message);
    }
}

fn create_spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("  {msg} {spinner}")
            .unwrap(),
    );
    pb.set_message(message);
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}
