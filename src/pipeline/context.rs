use std::fmt;

use clap::ValueEnum;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// What started the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    #[default]
    Push,
    Schedule,
    Trigger,
    Web,
    Api,
}

impl TriggerSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Schedule => "schedule",
            Self::Trigger => "trigger",
            Self::Web => "web",
            Self::Api => "api",
        }
    }
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single pipeline invocation: the ref being built, how it was started,
/// and any variables supplied on the command line.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    /// Project slug, used for cache namespacing and reports
    pub project: String,
    /// Git ref name (branch or tag)
    pub ref_name: String,
    /// Whether `ref_name` is a tag
    pub tag: bool,
    pub source: TriggerSource,
    /// Variables passed with `--var`, highest precedence
    pub variables: IndexMap<String, String>,
}

impl PipelineContext {
    /// Variables the runner itself provides to every job.
    pub fn predefined(&self) -> IndexMap<String, String> {
        let mut vars = IndexMap::new();
        vars.insert("CI_PROJECT".to_string(), self.project.clone());
        vars.insert("CI_REF".to_string(), self.ref_name.clone());
        if self.tag {
            vars.insert("CI_TAG".to_string(), self.ref_name.clone());
        }
        vars.insert("CI_SOURCE".to_string(), self.source.as_str().to_string());
        vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predefined_branch_context() {
        let ctx = PipelineContext {
            project: "group-project".to_string(),
            ref_name: "main".to_string(),
            tag: false,
            source: TriggerSource::Push,
            variables: IndexMap::new(),
        };

        let vars = ctx.predefined();
        assert_eq!(vars["CI_PROJECT"], "group-project");
        assert_eq!(vars["CI_REF"], "main");
        assert_eq!(vars["CI_SOURCE"], "push");
        assert!(!vars.contains_key("CI_TAG"));
    }

    #[test]
    fn test_predefined_tag_context() {
        let ctx = PipelineContext {
            project: "proj".to_string(),
            ref_name: "v1.2.0".to_string(),
            tag: true,
            source: TriggerSource::Trigger,
            variables: IndexMap::new(),
        };

        let vars = ctx.predefined();
        assert_eq!(vars["CI_TAG"], "v1.2.0");
        assert_eq!(vars["CI_SOURCE"], "trigger");
    }
}
