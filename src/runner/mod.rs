mod cache;
mod executor;

pub use cache::PathCache;
pub use executor::{Executor, ScriptOutcome, DEFAULT_SHELL};

use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use log::warn;

use crate::output::StageProgress;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::model::{Job, Pipeline};
use crate::pipeline::rules::{self, SkipReason, Verdict};
use crate::pipeline::schema::{CachePolicy, When};
use crate::pipeline::variables;
use crate::report::{JobReport, JobStatus, PipelineReport, StageReport};

/// Drives a resolved pipeline: stages strictly in order, jobs within a
/// stage concurrently, with fail-fast gating between stages.
pub struct Runner {
    executor: Executor,
    container_mode: bool,
    cache: PathCache,
    ctx: PipelineContext,
    workspace: PathBuf,
    manual_jobs: Vec<String>,
    run_manual: bool,
    verbose: bool,
}

impl Runner {
    pub fn new(
        workspace: PathBuf,
        shell: String,
        container_runtime: Option<String>,
        cache: PathCache,
        ctx: PipelineContext,
    ) -> Self {
        let container_mode = container_runtime.is_some();
        Self {
            executor: Executor::new(workspace.clone(), shell, container_runtime),
            container_mode,
            cache,
            ctx,
            workspace,
            manual_jobs: Vec::new(),
            run_manual: false,
            verbose: false,
        }
    }

    pub fn with_manual(mut self, manual_jobs: Vec<String>, run_manual: bool) -> Self {
        self.manual_jobs = manual_jobs;
        self.run_manual = run_manual;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Execute the pipeline and collect the full report. Execution itself
    /// never errors; every job failure is part of the report.
    pub async fn execute(&self, pipeline: &Pipeline) -> PipelineReport {
        let started_at = Utc::now();
        let timer = Instant::now();

        if !self.container_mode && pipeline.jobs().any(|job| job.image.is_some()) {
            warn!(
                "Jobs declare container images but no container runtime is configured, \
                 running on the host shell"
            );
        }

        let total = pipeline.stages.len();
        let mut stages = Vec::with_capacity(total);
        let mut pipeline_failed = false;

        for (index, stage) in pipeline.stages.iter().enumerate() {
            let progress = StageProgress::start(&stage.name, index + 1, total);

            let results = join_all(
                stage
                    .jobs
                    .iter()
                    .map(|job| self.run_job(job, pipeline_failed)),
            )
            .await;

            let (jobs, outputs): (Vec<_>, Vec<_>) = results.into_iter().unzip();

            let status = StageReport::derive_status(&jobs);
            progress.finish(status);

            for (job, output) in jobs.iter().zip(outputs) {
                if let Some(text) = output {
                    crate::output::print_job_output(&job.name, &text);
                }
            }

            if status == JobStatus::Failed {
                pipeline_failed = true;
            }

            stages.push(StageReport {
                name: stage.name.clone(),
                status,
                jobs,
            });
        }

        let finished_at = Utc::now();
        PipelineReport {
            project: self.ctx.project.clone(),
            ref_name: self.ctx.ref_name.clone(),
            tag: self.ctx.tag,
            source: self.ctx.source,
            started_at,
            finished_at,
            duration_secs: timer.elapsed().as_secs_f64(),
            status: PipelineReport::derive_status(&stages),
            stages,
        }
    }

    /// Run a single job, or record why it did not run. Returns the report
    /// and any captured output worth surfacing.
    async fn run_job(&self, job: &Job, pipeline_failed: bool) -> (JobReport, Option<String>) {
        let verdict = rules::job_verdict(job, &self.ctx, &self.manual_jobs, self.run_manual);

        if let Verdict::Skip(reason) = verdict {
            let status = match reason {
                SkipReason::Manual => JobStatus::Manual,
                _ => JobStatus::Skipped,
            };
            return (skipped_report(job, status, reason.to_string()), None);
        }

        // Promoted manual jobs follow on_success gating
        let effective_when = match job.when {
            When::Manual => When::OnSuccess,
            other => other,
        };
        match effective_when {
            When::OnSuccess if pipeline_failed => {
                return (
                    skipped_report(job, JobStatus::Skipped, "earlier stage failed".to_string()),
                    None,
                );
            }
            When::OnFailure if !pipeline_failed => {
                return (
                    skipped_report(job, JobStatus::Skipped, "no earlier failure".to_string()),
                    None,
                );
            }
            _ => {}
        }

        let env = variables::job_environment(job, &self.ctx);
        let timer = Instant::now();

        let cache_key = job.cache.as_ref().map(|spec| {
            let key = spec.key.as_deref().unwrap_or("default");
            variables::expand(key, &env)
        });

        if let (Some(spec), Some(key)) = (&job.cache, &cache_key) {
            if spec.policy != CachePolicy::Push {
                if let Err(err) = self.cache.restore(key, &spec.paths, &self.workspace) {
                    warn!("Cache restore failed for job '{}': {err}", job.name);
                }
            }
        }

        let mut attempts = 1u32;
        let mut outcome = self.run_with_timeout(job, &env).await;
        while !outcome.success && attempts <= u32::from(job.retry) {
            warn!("Job '{}' failed on attempt {attempts}, retrying", job.name);
            outcome = self.run_with_timeout(job, &env).await;
            attempts += 1;
        }

        let after = self.executor.run_after_script(job, &env).await;
        if !after.success {
            warn!("after_script of job '{}' failed, ignoring", job.name);
        }

        if outcome.success {
            if let (Some(spec), Some(key)) = (&job.cache, &cache_key) {
                if spec.policy != CachePolicy::Pull {
                    if let Err(err) = self.cache.save(key, &spec.paths, &self.workspace) {
                        warn!("Cache save failed for job '{}': {err}", job.name);
                    }
                }
            }
        } else if job.allow_failure {
            warn!("Job '{}' failed but is allowed to fail", job.name);
        }

        let status = if outcome.success {
            JobStatus::Success
        } else {
            JobStatus::Failed
        };

        let mut text = outcome.combined_output();
        let after_text = after.combined_output();
        if !after_text.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&after_text);
        }
        let surfaced = (self.verbose || !outcome.success) && !text.is_empty();

        let report = JobReport {
            name: job.name.clone(),
            stage: job.stage.clone(),
            status,
            duration_secs: timer.elapsed().as_secs_f64(),
            exit_code: outcome.exit_code,
            attempts,
            allow_failure: job.allow_failure,
            image: job.image.clone(),
            reason: outcome.note,
        };

        (report, surfaced.then_some(text))
    }

    async fn run_with_timeout(
        &self,
        job: &Job,
        env: &indexmap::IndexMap<String, String>,
    ) -> ScriptOutcome {
        match job.timeout {
            Some(limit) => {
                let fut = self.executor.run_script(job, env);
                match tokio::time::timeout(Duration::from_secs(limit), fut).await {
                    Ok(outcome) => outcome,
                    Err(_) => ScriptOutcome {
                        success: false,
                        exit_code: None,
                        stdout: String::new(),
                        stderr: String::new(),
                        note: Some(format!("timed out after {limit}s")),
                    },
                }
            }
            None => self.executor.run_script(job, env).await,
        }
    }
}

fn skipped_report(job: &Job, status: JobStatus, reason: String) -> JobReport {
    JobReport {
        name: job.name.clone(),
        stage: job.stage.clone(),
        status,
        duration_secs: 0.0,
        exit_code: None,
        attempts: 0,
        allow_failure: job.allow_failure,
        image: job.image.clone(),
        reason: Some(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::context::TriggerSource;
    use crate::pipeline::schema::Descriptor;
    use indexmap::IndexMap;
    use tempfile::TempDir;

    fn context(ref_name: &str) -> PipelineContext {
        PipelineContext {
            project: "test-project".to_string(),
            ref_name: ref_name.to_string(),
            tag: false,
            source: TriggerSource::Push,
            variables: IndexMap::new(),
        }
    }

    fn pipeline(yaml: &str) -> Pipeline {
        let desc: Descriptor = serde_yaml::from_str(yaml).unwrap();
        Pipeline::resolve(&desc, None)
    }

    fn runner(workspace: &TempDir) -> Runner {
        let cache = PathCache::new("test-project", false, None).unwrap();
        Runner::new(
            workspace.path().to_path_buf(),
            DEFAULT_SHELL.to_string(),
            None,
            cache,
            context("main"),
        )
    }

    #[tokio::test]
    async fn test_green_pipeline() {
        let workspace = TempDir::new().unwrap();
        let pipeline = pipeline(
            r"
unit:
  stage: test
  script: echo tested
package:
  stage: build
  script: echo built
",
        );

        let report = runner(&workspace).execute(&pipeline).await;

        assert_eq!(report.status, JobStatus::Success);
        assert_eq!(report.stages.len(), 2);
        assert_eq!(report.stages[0].name, "test");
        assert_eq!(report.stages[1].name, "build");
        assert!(report
            .stages
            .iter()
            .all(|stage| stage.status == JobStatus::Success));
    }

    #[tokio::test]
    async fn test_failure_skips_later_on_success_jobs() {
        let workspace = TempDir::new().unwrap();
        let pipeline = pipeline(
            r"
broken:
  stage: test
  script: 'false'
package:
  stage: build
  script: echo built
cleanup:
  stage: build
  script: echo cleaned
  when: always
recover:
  stage: build
  script: echo recovered
  when: on_failure
",
        );

        let report = runner(&workspace).execute(&pipeline).await;

        assert_eq!(report.status, JobStatus::Failed);
        assert_eq!(report.stages[0].status, JobStatus::Failed);

        let build = &report.stages[1];
        let by_name = |name: &str| build.jobs.iter().find(|j| j.name == name).unwrap();

        assert_eq!(by_name("package").status, JobStatus::Skipped);
        assert_eq!(
            by_name("package").reason.as_deref(),
            Some("earlier stage failed")
        );
        assert_eq!(by_name("cleanup").status, JobStatus::Success);
        assert_eq!(by_name("recover").status, JobStatus::Success);
    }

    #[tokio::test]
    async fn test_on_failure_job_skipped_while_green() {
        let workspace = TempDir::new().unwrap();
        let pipeline = pipeline(
            r"
unit:
  stage: test
  script: echo ok
recover:
  stage: build
  script: echo recovered
  when: on_failure
",
        );

        let report = runner(&workspace).execute(&pipeline).await;

        assert_eq!(report.status, JobStatus::Success);
        let recover = &report.stages[1].jobs[0];
        assert_eq!(recover.status, JobStatus::Skipped);
        assert_eq!(recover.reason.as_deref(), Some("no earlier failure"));
    }

    #[tokio::test]
    async fn test_allow_failure_keeps_pipeline_green() {
        let workspace = TempDir::new().unwrap();
        let pipeline = pipeline(
            r"
flaky-lint:
  stage: test
  script: 'false'
  allow_failure: true
unit:
  stage: test
  script: echo ok
",
        );

        let report = runner(&workspace).execute(&pipeline).await;

        assert_eq!(report.status, JobStatus::Success);
        let lint = &report.stages[0].jobs[0];
        assert_eq!(lint.status, JobStatus::Failed);
        assert!(lint.allow_failure);
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let workspace = TempDir::new().unwrap();
        let pipeline = pipeline(
            r"
once-flaky:
  stage: test
  script: 'test -f marker || { touch marker; false; }'
  retry: 2
",
        );

        let report = runner(&workspace).execute(&pipeline).await;

        let job = &report.stages[0].jobs[0];
        assert_eq!(job.status, JobStatus::Success);
        assert_eq!(job.attempts, 2);
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let workspace = TempDir::new().unwrap();
        let pipeline = pipeline(
            r"
always-broken:
  stage: test
  script: 'false'
  retry: 1
",
        );

        let report = runner(&workspace).execute(&pipeline).await;

        let job = &report.stages[0].jobs[0];
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 2);
    }

    #[tokio::test]
    async fn test_timeout_kills_the_job() {
        let workspace = TempDir::new().unwrap();
        let pipeline = pipeline(
            r"
slow:
  stage: test
  script: sleep 30
  timeout: 1
",
        );

        let report = runner(&workspace).execute(&pipeline).await;

        let job = &report.stages[0].jobs[0];
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.reason.as_deref().unwrap().contains("timed out after 1s"));
    }

    #[tokio::test]
    async fn test_manual_job_reported_not_run() {
        let workspace = TempDir::new().unwrap();
        let pipeline = pipeline(
            r"
deploy:
  stage: build
  script: echo deployed
  when: manual
",
        );

        let report = runner(&workspace).execute(&pipeline).await;

        assert_eq!(report.status, JobStatus::Success);
        let deploy = &report.stages[0].jobs[0];
        assert_eq!(deploy.status, JobStatus::Manual);
        assert_eq!(deploy.attempts, 0);
    }

    #[tokio::test]
    async fn test_promoted_manual_job_runs() {
        let workspace = TempDir::new().unwrap();
        let pipeline = pipeline(
            r"
deploy:
  stage: build
  script: echo deployed
  when: manual
",
        );

        let report = runner(&workspace)
            .with_manual(vec!["deploy".to_string()], false)
            .execute(&pipeline)
            .await;

        assert_eq!(report.stages[0].jobs[0].status, JobStatus::Success);
    }

    #[tokio::test]
    async fn test_only_mismatch_skips_whole_pipeline() {
        let workspace = TempDir::new().unwrap();
        let pipeline = pipeline(
            r"
release:
  stage: build
  script: echo released
  only:
    - tags
",
        );

        let report = runner(&workspace).execute(&pipeline).await;

        // Nothing ran, which still counts as a successful invocation
        assert_eq!(report.status, JobStatus::Success);
        assert_eq!(report.stages[0].status, JobStatus::Skipped);
    }

    #[tokio::test]
    async fn test_empty_pipeline_succeeds() {
        let workspace = TempDir::new().unwrap();
        let pipeline = Pipeline { stages: vec![] };

        let report = runner(&workspace).execute(&pipeline).await;

        assert_eq!(report.status, JobStatus::Success);
        assert!(report.stages.is_empty());
    }

    #[tokio::test]
    async fn test_after_script_runs_on_failure() {
        let workspace = TempDir::new().unwrap();
        let pipeline = pipeline(
            r"
broken:
  stage: test
  script: 'false'
  after_script:
    - touch after-ran
",
        );

        let report = runner(&workspace).execute(&pipeline).await;

        assert_eq!(report.status, JobStatus::Failed);
        assert!(workspace.path().join("after-ran").exists());
    }

    #[tokio::test]
    async fn test_cache_persists_between_runs() {
        let workspace = TempDir::new().unwrap();
        let cache_dir = TempDir::new().unwrap();

        let yaml = r"
build-deps:
  stage: build
  script: 'test -f vendor/dep.txt || { mkdir -p vendor; echo fetched > vendor/dep.txt; echo MISS; }'
  cache:
    key: deps
    paths:
      - vendor
";

        let run = |ws: std::path::PathBuf| {
            let cache = PathCache::new("test-project", true, Some(cache_dir.path())).unwrap();
            let runner = Runner::new(
                ws,
                DEFAULT_SHELL.to_string(),
                None,
                cache,
                context("main"),
            )
            .with_verbose(true);
            async move { runner.execute(&pipeline(yaml)).await }
        };

        let first = run(workspace.path().to_path_buf()).await;
        assert_eq!(first.status, JobStatus::Success);
        assert!(workspace.path().join("vendor/dep.txt").exists());

        // A fresh workspace restores vendor/ from the cache before the
        // script runs, so the MISS branch is never taken
        let fresh = TempDir::new().unwrap();
        let second = run(fresh.path().to_path_buf()).await;
        assert_eq!(second.status, JobStatus::Success);
        assert!(fresh.path().join("vendor/dep.txt").exists());
    }

    #[tokio::test]
    async fn test_cli_variables_reach_jobs() {
        let workspace = TempDir::new().unwrap();
        let mut ctx = context("main");
        ctx.variables
            .insert("TARGET".to_string(), "release".to_string());

        let cache = PathCache::new("test-project", false, None).unwrap();
        let runner = Runner::new(
            workspace.path().to_path_buf(),
            DEFAULT_SHELL.to_string(),
            None,
            cache,
            ctx,
        );

        let pipeline = pipeline(
            r"
build:
  stage: build
  script: 'echo $TARGET > target-used'
",
        );

        let report = runner.execute(&pipeline).await;
        assert_eq!(report.status, JobStatus::Success);

        let contents = std::fs::read_to_string(workspace.path().join("target-used")).unwrap();
        assert_eq!(contents.trim(), "release");
    }
}
