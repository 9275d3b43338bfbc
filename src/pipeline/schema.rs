use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A raw pipeline descriptor as authored in `.cirun.yml`.
///
/// Follows the GitLab CI convention: a handful of reserved top-level keys
/// (`stages`, `image`, `variables`, `cache`, `before_script`, `after_script`)
/// and every remaining top-level key is a job definition. Job order is
/// preserved as authored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Descriptor {
    /// Ordered stage names
    #[serde(default = "default_stages")]
    pub stages: Vec<String>,

    /// Default container image for all jobs
    #[serde(default)]
    pub image: Option<String>,

    /// Global pipeline variables
    #[serde(default)]
    pub variables: IndexMap<String, String>,

    /// Default cache specification
    #[serde(default)]
    pub cache: Option<CacheSpec>,

    /// Script prologue merged into every job
    #[serde(default)]
    pub before_script: Vec<String>,

    /// Script epilogue merged into every job
    #[serde(default)]
    pub after_script: Vec<String>,

    /// Job definitions, keyed by job name
    #[serde(flatten)]
    pub jobs: IndexMap<String, JobSpec>,
}

/// A job definition within the descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobSpec {
    /// Stage this job belongs to
    #[serde(default = "default_stage")]
    pub stage: String,

    /// Shell commands to execute
    #[serde(default)]
    pub script: Lines,

    /// Container image, overrides the global image
    #[serde(default)]
    pub image: Option<String>,

    /// Job-level variables, override globals of the same name
    #[serde(default)]
    pub variables: IndexMap<String, String>,

    /// Cache specification, overrides the global cache
    #[serde(default)]
    pub cache: Option<CacheSpec>,

    /// Replaces the global prologue when present
    #[serde(default)]
    pub before_script: Option<Lines>,

    /// Replaces the global epilogue when present
    #[serde(default)]
    pub after_script: Option<Lines>,

    /// Refs/sources this job runs for
    #[serde(default)]
    pub only: Option<RefSpec>,

    /// Refs/sources this job never runs for, wins over `only`
    #[serde(default)]
    pub except: Option<RefSpec>,

    /// Run condition relative to pipeline state
    #[serde(default)]
    pub when: When,

    /// A failure of this job does not fail its stage
    #[serde(default)]
    pub allow_failure: bool,

    /// Extra attempts on failure, clamped to 2
    #[serde(default)]
    pub retry: u8,

    /// Wall-clock limit in seconds
    #[serde(default)]
    pub timeout: Option<u64>,
}

/// One script line or a list of lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Lines {
    One(String),
    Many(Vec<String>),
}

impl Lines {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Self::One(line) => vec![line.clone()],
            Self::Many(lines) => lines.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::One(line) => line.is_empty(),
            Self::Many(lines) => lines.is_empty(),
        }
    }
}

impl Default for Lines {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

/// One ref pattern or a list of patterns.
///
/// A pattern is either a source keyword (`branches`, `tags`, `triggers`,
/// `schedules`, `web`, `api`, `pushes`) or a glob matched against the ref
/// name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RefSpec {
    One(String),
    Many(Vec<String>),
}

impl RefSpec {
    pub fn patterns(&self) -> &[String] {
        match self {
            Self::One(pattern) => std::slice::from_ref(pattern),
            Self::Many(patterns) => patterns,
        }
    }
}

/// Cache specification for a job or the whole pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSpec {
    /// Cache key, may reference variables; `"default"` when absent
    #[serde(default)]
    pub key: Option<String>,

    /// Workspace-relative paths to cache
    #[serde(default)]
    pub paths: Vec<String>,

    /// Restore/persist behavior
    #[serde(default)]
    pub policy: CachePolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CachePolicy {
    #[default]
    PullPush,
    Pull,
    Push,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum When {
    #[default]
    OnSuccess,
    Always,
    OnFailure,
    Manual,
    Never,
}

fn default_stages() -> Vec<String> {
    vec!["test".to_string(), "build".to_string()]
}

fn default_stage() -> String {
    "test".to_string()
}

impl Descriptor {
    /// Load a descriptor from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline descriptor: {}", path.display()))?;

        serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse pipeline descriptor: {}", path.display()))
    }
}
