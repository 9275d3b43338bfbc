use std::fmt;

use super::schema::{Descriptor, RefSpec};

const SOURCE_KEYWORDS: &[&str] = &[
    "branches",
    "tags",
    "triggers",
    "schedules",
    "web",
    "api",
    "pushes",
];

/// Maximum extra attempts a job may request.
pub const RETRY_LIMIT: u8 = 2;

/// A single validation finding, tied to a job when one is involved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub job: Option<String>,
    pub message: String,
}

impl Finding {
    fn pipeline(message: impl Into<String>) -> Self {
        Self {
            job: None,
            message: message.into(),
        }
    }

    fn job(name: &str, message: impl Into<String>) -> Self {
        Self {
            job: Some(name.to_string()),
            message: message.into(),
        }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.job {
            Some(job) => write!(f, "job '{job}': {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Check a descriptor and collect every finding instead of stopping at the
/// first. `run` and `plan` refuse descriptors with findings; `lint` prints
/// them all.
pub fn validate(desc: &Descriptor) -> Vec<Finding> {
    let mut findings = Vec::new();

    if desc.jobs.is_empty() {
        findings.push(Finding::pipeline("descriptor defines no jobs"));
    }

    for (name, spec) in &desc.jobs {
        if !desc.stages.contains(&spec.stage) {
            findings.push(Finding::job(
                name,
                format!("references unknown stage '{}'", spec.stage),
            ));
        }

        if spec.script.is_empty() {
            findings.push(Finding::job(name, "script is empty"));
        }

        if let Some(only) = &spec.only {
            check_patterns(name, "only", only, &mut findings);
        }
        if let Some(except) = &spec.except {
            check_patterns(name, "except", except, &mut findings);
        }

        if let Some(cache) = &spec.cache {
            if cache.key.is_some() && cache.paths.is_empty() {
                findings.push(Finding::job(name, "cache has a key but no paths"));
            }
        }

        if spec.retry > RETRY_LIMIT {
            findings.push(Finding::job(
                name,
                format!("retry {} exceeds the limit of {RETRY_LIMIT}", spec.retry),
            ));
        }
    }

    if let Some(cache) = &desc.cache {
        if cache.key.is_some() && cache.paths.is_empty() {
            findings.push(Finding::pipeline("global cache has a key but no paths"));
        }
    }

    findings
}

/// A pattern that is neither a source keyword nor a parsable glob still
/// matches as a literal ref name at run time, but is almost always a typo.
fn check_patterns(job: &str, field: &str, spec: &RefSpec, findings: &mut Vec<Finding>) {
    for pattern in spec.patterns() {
        if SOURCE_KEYWORDS.contains(&pattern.as_str()) {
            continue;
        }
        if glob::Pattern::new(pattern).is_err() {
            findings.push(Finding::job(
                job,
                format!("{field} pattern '{pattern}' is not a keyword or a valid glob"),
            ));
        }
    }
}
