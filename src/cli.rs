use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use indexmap::IndexMap;
use log::info;
use std::path::{Path, PathBuf};

use crate::config::{Config, OutputFormat};
use crate::error::CirunError;
use crate::output;
use crate::pipeline::context::{PipelineContext, TriggerSource};
use crate::pipeline::model::Pipeline;
use crate::pipeline::rules;
use crate::pipeline::schema::Descriptor;
use crate::pipeline::validate;
use crate::runner::{PathCache, Runner};

#[derive(Parser)]
#[command(name = "cirun")]
#[command(author, version, about = "Declarative CI Pipeline Runner", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Pipeline descriptor path
    #[arg(short, long, global = true, default_value = ".cirun.yml")]
    file: PathBuf,

    /// Runner configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Write the JSON report or plan to this path
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    #[arg(short, long, global = true, default_value_t = false)]
    pretty: bool,
}

/// Flags describing the pipeline invocation being simulated.
#[derive(Args)]
struct ContextArgs {
    /// Git ref the pipeline runs for
    #[arg(long = "ref", value_name = "NAME", default_value = "main", env = "CIRUN_REF")]
    ref_name: String,

    /// Treat the ref as a tag
    #[arg(long)]
    tag: bool,

    /// What started the pipeline
    #[arg(long, value_enum, default_value_t = TriggerSource::Push)]
    source: TriggerSource,

    /// Extra variables, highest precedence (repeatable)
    #[arg(long = "var", value_name = "KEY=VALUE")]
    vars: Vec<String>,

    /// Project slug for cache namespacing and reports
    #[arg(short = 'P', long)]
    project: Option<String>,
}

#[derive(Args)]
struct ManualArgs {
    /// Promote a manual job by name (repeatable)
    #[arg(long = "manual", value_name = "JOB")]
    manual: Vec<String>,

    /// Promote every manual job
    #[arg(long)]
    run_manual: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute the pipeline for the given invocation context
    Run {
        #[command(flatten)]
        context: ContextArgs,

        #[command(flatten)]
        manual: ManualArgs,

        /// Disable cache restore and save
        #[arg(long)]
        no_cache: bool,

        /// Remove the project's cache tree before running
        #[arg(long)]
        clear_cache: bool,

        /// Print captured job output for successful jobs too
        #[arg(short, long)]
        verbose: bool,
    },

    /// Show which jobs would run, without executing anything
    Plan {
        #[command(flatten)]
        context: ContextArgs,

        #[command(flatten)]
        manual: ManualArgs,
    },

    /// Validate the pipeline descriptor
    Lint,
}

impl Cli {
    pub async fn execute(&self) -> Result<()> {
        match &self.command {
            Commands::Run {
                context,
                manual,
                no_cache,
                clear_cache,
                verbose,
            } => {
                self.execute_run(context, manual, *no_cache, *clear_cache, *verbose)
                    .await
            }
            Commands::Plan { context, manual } => self.execute_plan(context, manual),
            Commands::Lint => self.execute_lint(),
        }
    }

    async fn execute_run(
        &self,
        context: &ContextArgs,
        manual: &ManualArgs,
        no_cache: bool,
        clear_cache: bool,
        verbose: bool,
    ) -> Result<()> {
        let config = Config::load(self.config.as_deref())?;
        let descriptor = self.load_checked_descriptor()?;
        let pipeline = Pipeline::resolve(&descriptor, config.runner.default_image.as_deref());

        let workspace = std::env::current_dir()?;
        let ctx = build_context(context, &config, &workspace)?;

        info!(
            "Running pipeline for ref '{}' (source: {})",
            ctx.ref_name,
            ctx.source.as_str()
        );

        let cache = PathCache::new(
            &ctx.project,
            config.cache.enabled && !no_cache,
            config.cache.dir.as_deref(),
        )?;
        if clear_cache {
            cache.clear()?;
        }

        let runner = Runner::new(
            workspace,
            config.runner.shell.clone(),
            config.runner.container_runtime.clone(),
            cache,
            ctx,
        )
        .with_manual(manual.manual.clone(), manual.run_manual)
        .with_verbose(verbose);

        let report = runner.execute(&pipeline).await;

        let pretty = self.pretty || config.output.pretty;
        let json_output = if pretty {
            serde_json::to_string_pretty(&report)?
        } else {
            serde_json::to_string(&report)?
        };

        if let Some(output_path) = &self.output {
            std::fs::write(output_path, &json_output)?;
            info!("Report written to: {}", output_path.display());
        }

        match config.output.format {
            OutputFormat::Json => println!("{json_output}"),
            OutputFormat::Summary => output::print_summary(&report),
        }

        if report.failed() {
            anyhow::bail!("Pipeline failed");
        }

        Ok(())
    }

    fn execute_plan(&self, context: &ContextArgs, manual: &ManualArgs) -> Result<()> {
        let config = Config::load(self.config.as_deref())?;
        let descriptor = self.load_checked_descriptor()?;
        let pipeline = Pipeline::resolve(&descriptor, config.runner.default_image.as_deref());

        let workspace = std::env::current_dir()?;
        let ctx = build_context(context, &config, &workspace)?;

        let entries: Vec<output::PlanEntry> = pipeline
            .jobs()
            .map(|job| {
                let verdict = rules::job_verdict(job, &ctx, &manual.manual, manual.run_manual);
                output::PlanEntry::new(job, &verdict)
            })
            .collect();

        if let Some(output_path) = &self.output {
            let json_output = if self.pretty {
                serde_json::to_string_pretty(&entries)?
            } else {
                serde_json::to_string(&entries)?
            };
            std::fs::write(output_path, json_output)?;
            info!("Plan written to: {}", output_path.display());
        }

        output::print_plan(&entries);

        Ok(())
    }

    fn execute_lint(&self) -> Result<()> {
        let descriptor = Descriptor::load(&self.file)?;
        let findings = validate::validate(&descriptor);

        if findings.is_empty() {
            println!("{}: no findings", self.file.display());
            return Ok(());
        }

        for finding in &findings {
            eprintln!("{finding}");
        }
        Err(CirunError::Descriptor(format!("{} validation finding(s)", findings.len())).into())
    }

    /// Load the descriptor and refuse to proceed on validation findings,
    /// pointing at `lint` for the full list.
    fn load_checked_descriptor(&self) -> Result<Descriptor> {
        let descriptor = Descriptor::load(&self.file)?;
        let findings = validate::validate(&descriptor);

        if !findings.is_empty() {
            for finding in &findings {
                eprintln!("{finding}");
            }
            return Err(CirunError::Descriptor(format!(
                "{} validation finding(s) in {}",
                findings.len(),
                self.file.display()
            ))
            .into());
        }

        Ok(descriptor)
    }
}

fn build_context(
    args: &ContextArgs,
    config: &Config,
    workspace: &Path,
) -> Result<PipelineContext> {
    let project = args
        .project
        .clone()
        .or_else(|| config.runner.project.clone())
        .or_else(|| {
            workspace
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "workspace".to_string());

    let mut variables = IndexMap::new();
    for pair in &args.vars {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            CirunError::Config(format!("invalid --var '{pair}', expected KEY=VALUE"))
        })?;
        variables.insert(key.to_string(), value.to_string());
    }

    Ok(PipelineContext {
        project,
        ref_name: args.ref_name.clone(),
        tag: args.tag,
        source: args.source,
        variables,
    })
}
