use std::path::PathBuf;
use std::process::Stdio;

use indexmap::IndexMap;
use log::debug;
use tokio::process::Command;

use crate::pipeline::model::Job;
use crate::pipeline::variables;

/// Default shell for script execution.
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// What a script execution produced. Spawn failures are outcomes too, with
/// the io error carried in `note` instead of crashing the run.
#[derive(Debug, Clone, Default)]
pub struct ScriptOutcome {
    pub success: bool,
    /// Exit code of the last executed command, absent on spawn failure
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Failure detail: the failing line or the spawn error
    pub note: Option<String>,
}

impl ScriptOutcome {
    fn spawn_failure(detail: String) -> Self {
        Self {
            success: false,
            note: Some(detail),
            ..Self::default()
        }
    }

    /// Stdout and stderr combined, for surfacing after a run.
    pub fn combined_output(&self) -> String {
        let mut out = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&self.stderr);
        }
        out
    }
}

/// Executes one job's scripts on the host shell or through a container
/// runtime.
pub struct Executor {
    project_root: PathBuf,
    shell: String,
    container_runtime: Option<String>,
}

impl Executor {
    pub fn new(
        project_root: PathBuf,
        shell: impl Into<String>,
        container_runtime: Option<String>,
    ) -> Self {
        Self {
            project_root,
            shell: shell.into(),
            container_runtime,
        }
    }

    /// Run the job's main script with the given variables.
    pub async fn run_script(&self, job: &Job, env: &IndexMap<String, String>) -> ScriptOutcome {
        self.run_lines(job, &job.script, env).await
    }

    /// Run the job's `after_script`. Callers invoke this regardless of how
    /// the main script ended.
    pub async fn run_after_script(
        &self,
        job: &Job,
        env: &IndexMap<String, String>,
    ) -> ScriptOutcome {
        self.run_lines(job, &job.after_script, env).await
    }

    async fn run_lines(
        &self,
        job: &Job,
        lines: &[String],
        env: &IndexMap<String, String>,
    ) -> ScriptOutcome {
        let lines: Vec<String> = lines
            .iter()
            .map(|line| variables::expand(line, env))
            .collect();

        if lines.is_empty() {
            return ScriptOutcome {
                success: true,
                exit_code: Some(0),
                ..ScriptOutcome::default()
            };
        }

        let image = job
            .image
            .as_deref()
            .map(|image| variables::expand(image, env));

        match (&self.container_runtime, image) {
            (Some(runtime), Some(image)) => {
                self.run_container(runtime, &image, &lines, env).await
            }
            _ => self.run_host(&lines, env).await,
        }
    }

    /// Execute lines one at a time through the shell, stopping at the first
    /// failure so the report can name the failing line.
    async fn run_host(&self, lines: &[String], env: &IndexMap<String, String>) -> ScriptOutcome {
        let mut outcome = ScriptOutcome {
            success: true,
            exit_code: Some(0),
            ..ScriptOutcome::default()
        };

        for line in lines {
            debug!("$ {line}");

            let mut cmd = Command::new(&self.shell);
            cmd.arg("-c")
                .arg(line)
                .current_dir(&self.project_root)
                .envs(env)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);

            let output = match cmd.output().await {
                Ok(output) => output,
                Err(err) => {
                    return ScriptOutcome::spawn_failure(format!(
                        "failed to spawn shell '{}': {err}",
                        self.shell
                    ));
                }
            };

            outcome.stdout.push_str(&String::from_utf8_lossy(&output.stdout));
            outcome.stderr.push_str(&String::from_utf8_lossy(&output.stderr));
            outcome.exit_code = output.status.code();

            if !output.status.success() {
                outcome.success = false;
                outcome.note = Some(format!(
                    "command failed with exit code {}: {line}",
                    output.status.code().unwrap_or(-1)
                ));
                return outcome;
            }
        }

        outcome
    }

    /// Execute the whole script as a single container run, the way CI
    /// executors amortize container startup.
    async fn run_container(
        &self,
        runtime: &str,
        image: &str,
        lines: &[String],
        env: &IndexMap<String, String>,
    ) -> ScriptOutcome {
        let script = {
            let mut script = String::from("set -e\n");
            script.push_str(&lines.join("\n"));
            script
        };

        debug!("{runtime} run {image}: {} script lines", lines.len());

        let mut cmd = Command::new(runtime);
        cmd.arg("run")
            .arg("--rm")
            .arg("-w")
            .arg("/work")
            .arg("-v")
            .arg(format!("{}:/work", self.project_root.display()));

        for (key, value) in env {
            cmd.arg("-e").arg(format!("{key}={value}"));
        }

        cmd.arg(image)
            .arg(&self.shell)
            .arg("-c")
            .arg(&script)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match cmd.output().await {
            Ok(output) => output,
            Err(err) => {
                return ScriptOutcome::spawn_failure(format!(
                    "failed to spawn container runtime '{runtime}': {err}"
                ));
            }
        };

        let success = output.status.success();
        ScriptOutcome {
            success,
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            note: if success {
                None
            } else {
                Some(format!(
                    "container job failed with exit code {}",
                    output.status.code().unwrap_or(-1)
                ))
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::model::Pipeline;
    use crate::pipeline::schema::Descriptor;
    use tempfile::TempDir;

    fn job(yaml: &str) -> Job {
        let desc: Descriptor = serde_yaml::from_str(yaml).unwrap();
        Pipeline::resolve(&desc, None).jobs().next().unwrap().clone()
    }

    fn executor(root: &TempDir) -> Executor {
        Executor::new(root.path().to_path_buf(), DEFAULT_SHELL, None)
    }

    #[tokio::test]
    async fn test_simple_script_succeeds() {
        let tmp = TempDir::new().unwrap();
        let job = job("job:\n  script: echo hello\n");

        let outcome = executor(&tmp).run_script(&job, &IndexMap::new()).await;

        assert!(outcome.success);
        assert_eq!(outcome.exit_code, Some(0));
        assert!(outcome.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_stops_at_first_failing_line() {
        let tmp = TempDir::new().unwrap();
        let job = job("job:\n  script:\n    - echo before\n    - 'false'\n    - echo after\n");

        let outcome = executor(&tmp).run_script(&job, &IndexMap::new()).await;

        assert!(!outcome.success);
        assert_ne!(outcome.exit_code, Some(0));
        assert!(outcome.stdout.contains("before"));
        assert!(!outcome.stdout.contains("after"));
        assert!(outcome.note.unwrap().contains("false"));
    }

    #[tokio::test]
    async fn test_variables_reach_the_script() {
        let tmp = TempDir::new().unwrap();
        let job = job("job:\n  script: printenv GREETING\n");

        let mut env = IndexMap::new();
        env.insert("GREETING".to_string(), "from-env".to_string());

        let outcome = executor(&tmp).run_script(&job, &env).await;

        assert!(outcome.success);
        assert!(outcome.stdout.contains("from-env"));
    }

    #[tokio::test]
    async fn test_lines_are_interpolated_before_execution() {
        let tmp = TempDir::new().unwrap();
        let job = job("job:\n  script: echo ref=${CI_REF}\n");

        let mut env = IndexMap::new();
        env.insert("CI_REF".to_string(), "main".to_string());

        let outcome = executor(&tmp).run_script(&job, &env).await;

        assert!(outcome.stdout.contains("ref=main"));
    }

    #[tokio::test]
    async fn test_runs_in_project_root() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("marker.txt"), "here").unwrap();
        let job = job("job:\n  script: cat marker.txt\n");

        let outcome = executor(&tmp).run_script(&job, &IndexMap::new()).await;

        assert!(outcome.success);
        assert!(outcome.stdout.contains("here"));
    }

    #[tokio::test]
    async fn test_missing_shell_is_a_job_failure() {
        let tmp = TempDir::new().unwrap();
        let executor = Executor::new(tmp.path().to_path_buf(), "/nonexistent/shell", None);
        let job = job("job:\n  script: echo hi\n");

        let outcome = executor.run_script(&job, &IndexMap::new()).await;

        assert!(!outcome.success);
        assert!(outcome.exit_code.is_none());
        assert!(outcome.note.unwrap().contains("failed to spawn"));
    }

    #[tokio::test]
    async fn test_empty_after_script_succeeds() {
        let tmp = TempDir::new().unwrap();
        let job = job("job:\n  script: echo hi\n");

        let outcome = executor(&tmp).run_after_script(&job, &IndexMap::new()).await;

        assert!(outcome.success);
        assert!(outcome.stdout.is_empty());
    }

    #[tokio::test]
    async fn test_image_without_runtime_runs_on_host() {
        let tmp = TempDir::new().unwrap();
        let job = job("job:\n  image: rust:1.80\n  script: echo on-host\n");

        let outcome = executor(&tmp).run_script(&job, &IndexMap::new()).await;

        assert!(outcome.success);
        assert!(outcome.stdout.contains("on-host"));
    }

    #[test]
    fn test_combined_output_joins_streams() {
        let outcome = ScriptOutcome {
            success: false,
            exit_code: Some(1),
            stdout: "out".to_string(),
            stderr: "err".to_string(),
            note: None,
        };
        assert_eq!(outcome.combined_output(), "out\nerr");
    }
}
