use std::fmt;

use super::context::{PipelineContext, TriggerSource};
use super::model::Job;
use super::schema::{RefSpec, When};

/// Whether a job is part of this pipeline invocation, and if not, why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Run,
    Skip(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No `only` pattern matched the context
    OnlyMismatch,
    /// An `except` pattern matched the context
    ExceptMatch,
    /// `when: never`
    Never,
    /// `when: manual` and the job was not promoted
    Manual,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OnlyMismatch => write!(f, "no 'only' pattern matches"),
            Self::ExceptMatch => write!(f, "'except' pattern matches"),
            Self::Never => write!(f, "when: never"),
            Self::Manual => write!(f, "manual job, not promoted"),
        }
    }
}

/// Evaluate a job's trigger predicates against the invocation context.
///
/// `except` is checked after `only` and wins on a match. Manual jobs are
/// skipped unless promoted by name or wholesale.
pub fn job_verdict(
    job: &Job,
    ctx: &PipelineContext,
    manual_jobs: &[String],
    run_manual: bool,
) -> Verdict {
    if job.when == When::Never {
        return Verdict::Skip(SkipReason::Never);
    }

    if let Some(only) = &job.only {
        if !matches_any(only, ctx) {
            return Verdict::Skip(SkipReason::OnlyMismatch);
        }
    }

    if let Some(except) = &job.except {
        if matches_any(except, ctx) {
            return Verdict::Skip(SkipReason::ExceptMatch);
        }
    }

    if job.when == When::Manual && !run_manual && !manual_jobs.contains(&job.name) {
        return Verdict::Skip(SkipReason::Manual);
    }

    Verdict::Run
}

fn matches_any(spec: &RefSpec, ctx: &PipelineContext) -> bool {
    spec.patterns().iter().any(|p| pattern_matches(p, ctx))
}

/// Match a single `only`/`except` pattern against the context.
///
/// Source keywords match on how the pipeline was started; anything else is
/// a glob against the ref name. A pattern that is not a valid glob falls
/// back to a literal comparison (`validate` flags it separately).
pub fn pattern_matches(pattern: &str, ctx: &PipelineContext) -> bool {
    match pattern {
        "branches" => !ctx.tag,
        "tags" => ctx.tag,
        "triggers" => ctx.source == TriggerSource::Trigger,
        "schedules" => ctx.source == TriggerSource::Schedule,
        "web" => ctx.source == TriggerSource::Web,
        "api" => ctx.source == TriggerSource::Api,
        "pushes" => ctx.source == TriggerSource::Push,
        _ => glob::Pattern::new(pattern)
            .map_or_else(|_| pattern == ctx.ref_name, |p| p.matches(&ctx.ref_name)),
    }
}
