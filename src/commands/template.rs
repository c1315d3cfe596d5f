use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Subcommand};
use serde::Serialize;

use release_forge::api::{HttpClient, RetryPolicy, RetryingClient};
use release_forge::compiler::VariantTable;
use release_forge::config::{self, Settings};
use release_forge::{compile_with, dry_run, Error, ExecutionReport, Executor, PlanPreview};

use super::CmdResult;

#[derive(Args)]
pub struct TemplateArgs {
    #[command(subcommand)]
    command: TemplateCommand,
}

#[derive(Subcommand)]
enum TemplateCommand {
    /// Compile a release descriptor and create the template on the orchestrator
    Create {
        /// Path to the YAML or JSON release descriptor
        descriptor: PathBuf,
        /// Settings file (defaults to ~/.config/release-forge/settings.toml)
        #[arg(long)]
        settings: Option<PathBuf>,
        /// Maximum concurrent API calls per layer
        #[arg(long)]
        fan_out: Option<usize>,
    },
    /// Compile a release descriptor and show the plan without calling the orchestrator
    Plan {
        /// Path to the YAML or JSON release descriptor
        descriptor: PathBuf,
        /// Settings file, used for application-variant rules
        #[arg(long)]
        settings: Option<PathBuf>,
    },
}

#[derive(Serialize)]
#[serde(tag = "command")]
pub enum TemplateOutput {
    #[serde(rename = "template.create")]
    Create { report: ExecutionReport },
    #[serde(rename = "template.plan")]
    Plan { preview: PlanPreview },
}

pub fn run(args: TemplateArgs, _global: &crate::commands::GlobalArgs) -> CmdResult<TemplateOutput> {
    match args.command {
        TemplateCommand::Create {
            descriptor,
            settings,
            fan_out,
        } => create(&descriptor, settings.as_deref(), fan_out),
        TemplateCommand::Plan {
            descriptor,
            settings,
        } => {
            let settings = Settings::load(settings.as_deref())?;
            let variants = VariantTable::from_settings(&settings.variants)?;
            let cfg = config::load_validated(&descriptor)?;
            let plan = compile_with(&cfg, &variants)?;
            let preview = dry_run(&plan)?;
            Ok((TemplateOutput::Plan { preview }, 0))
        }
    }
}

fn create(
    descriptor: &Path,
    settings: Option<&Path>,
    fan_out: Option<usize>,
) -> CmdResult<TemplateOutput> {
    let mut settings = Settings::load(settings)?;
    if let Some(fan_out) = fan_out {
        settings.fan_out = fan_out;
    }

    let variants = VariantTable::from_settings(&settings.variants)?;
    let cfg = config::load_validated(descriptor)?;
    let plan = compile_with(&cfg, &variants)?;

    let client = RetryingClient::new(
        HttpClient::new(&settings)?,
        RetryPolicy::from_settings(&settings.retry),
    );
    let executor = Executor::new(Arc::new(client), settings.effective_fan_out());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::internal_io(e.to_string(), Some("start async runtime".into())))?;
    let report = runtime.block_on(executor.execute(&plan))?;

    Ok((TemplateOutput::Create { report }, 0))
}
