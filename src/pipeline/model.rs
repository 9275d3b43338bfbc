use indexmap::IndexMap;

use super::schema::{CacheSpec, Descriptor, RefSpec, When};

/// An executable pipeline plan: declared stages in order, each holding its
/// jobs in descriptor order, with every job fully merged against the
/// pipeline-level defaults.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub stages: Vec<Stage>,
}

#[derive(Debug, Clone)]
pub struct Stage {
    pub name: String,
    pub jobs: Vec<Job>,
}

/// A job with all descriptor-level defaults resolved.
#[derive(Debug, Clone)]
pub struct Job {
    pub name: String,
    pub stage: String,
    /// Effective image: job override, then pipeline default, then runner default
    pub image: Option<String>,
    /// Prologue plus the job's own script
    pub script: Vec<String>,
    /// Runs after the script regardless of its outcome
    pub after_script: Vec<String>,
    /// Globals merged with job-level variables
    pub variables: IndexMap<String, String>,
    pub cache: Option<CacheSpec>,
    pub only: Option<RefSpec>,
    pub except: Option<RefSpec>,
    pub when: When,
    pub allow_failure: bool,
    pub retry: u8,
    pub timeout: Option<u64>,
}

impl Pipeline {
    /// Resolve a descriptor into an executable plan.
    ///
    /// Assumes the descriptor passed validation: jobs referencing unknown
    /// stages are silently absent from the plan, which `validate` reports
    /// beforehand. Stages with no jobs are dropped.
    pub fn resolve(desc: &Descriptor, default_image: Option<&str>) -> Self {
        let stages = desc
            .stages
            .iter()
            .map(|stage_name| Stage {
                name: stage_name.clone(),
                jobs: desc
                    .jobs
                    .iter()
                    .filter(|(_, spec)| spec.stage == *stage_name)
                    .map(|(name, spec)| {
                        let mut script = spec
                            .before_script
                            .as_ref()
                            .map_or_else(|| desc.before_script.clone(), super::schema::Lines::to_vec);
                        script.extend(spec.script.to_vec());

                        let after_script = spec
                            .after_script
                            .as_ref()
                            .map_or_else(|| desc.after_script.clone(), super::schema::Lines::to_vec);

                        let mut variables = desc.variables.clone();
                        variables.extend(spec.variables.clone());

                        Job {
                            name: name.clone(),
                            stage: stage_name.clone(),
                            image: spec
                                .image
                                .clone()
                                .or_else(|| desc.image.clone())
                                .or_else(|| default_image.map(ToOwned::to_owned)),
                            script,
                            after_script,
                            variables,
                            cache: spec.cache.clone().or_else(|| desc.cache.clone()),
                            only: spec.only.clone(),
                            except: spec.except.clone(),
                            when: spec.when,
                            allow_failure: spec.allow_failure,
                            retry: spec.retry.min(2),
                            timeout: spec.timeout,
                        }
                    })
                    .collect(),
            })
            .filter(|stage: &Stage| !stage.jobs.is_empty())
            .collect();

        Self { stages }
    }

    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.stages.iter().flat_map(|stage| stage.jobs.iter())
    }
}
