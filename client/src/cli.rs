use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::{JobOrder, JobStatus, PipelineConfig, StepSpec};
use runner::{HttpBackend, JobRunner, PipelinesBackend};
use serde::Serialize;
use std::{path::PathBuf, sync::Arc};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "client")]
#[command(about = "Corre steps de un workflow como tareas del API de pipelines")]
struct Cli {
    /// JSON con la configuración (claves kebab-case); las FUNNEL_* la pisan
    #[arg(long, global = true, value_name = "ARCHIVO")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dry run: muestra el comando y la tarea sin enviar nada
    Render {
        #[arg(value_name = "STEP_JSON")]
        step: PathBuf,
        #[arg(value_name = "JOB_JSON")]
        job: PathBuf,
    },
    /// Envía el step y espera a que termine
    Run {
        #[arg(value_name = "STEP_JSON")]
        step: PathBuf,
        #[arg(value_name = "JOB_JSON")]
        job: PathBuf,
    },
    /// Consulta una operación por nombre
    Status {
        #[arg(value_name = "OPERATION")]
        name: String,
    },
}

#[derive(Serialize)]
struct RenderReport<'a> {
    command: &'a str,
    task: &'a common::TaskRequest,
}

fn load_config(path: Option<&PathBuf>) -> Result<PipelineConfig> {
    match path {
        Some(p) => {
            let mut cfg = PipelineConfig::from_file(p)?;
            cfg.apply_env_overrides();
            Ok(cfg)
        }
        None => Ok(PipelineConfig::from_env()),
    }
}

fn build_runner(cfg: PipelineConfig) -> Result<JobRunner> {
    let backend = HttpBackend::from_config(&cfg)?;
    let runner = JobRunner::new(Arc::new(backend), cfg)?;
    Ok(runner)
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let cfg = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Render { step, job } => {
            let step = StepSpec::from_file(&step)?;
            let job = JobOrder::from_file(&job)?;
            let runner = build_runner(cfg)?;

            let prepared = runner.prepare(&step, &job)?;
            let report = RenderReport {
                command: &prepared.rendered.command,
                task: &prepared.task,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Run { step, job } => {
            let step = StepSpec::from_file(&step)?;
            let job = JobOrder::from_file(&job)?;
            let runner = build_runner(cfg)?;

            let handle = runner
                .submit(&step, &job)
                .await
                .with_context(|| format!("no se pudo enviar el step {}", step.id))?;
            info!("operación {} enviada, esperando...", handle.operation());

            let operation = handle.operation().to_string();
            let cancel_on_ctrl_c = {
                let cancel = handle.cancel_token();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        warn!("ctrl-c: cancelando el polling de {}", operation);
                        cancel.cancel();
                    }
                })
            };

            let result = handle.wait().await?;
            cancel_on_ctrl_c.abort();

            println!("{}", serde_json::to_string_pretty(&result)?);

            if result.status == JobStatus::PermanentFail {
                let missing = result.outputs.unresolved();
                eprintln!(
                    "El job {} falló (outputs sin resolver: {:?})",
                    result.operation, missing
                );
                std::process::exit(1);
            }
        }

        Commands::Status { name } => {
            let backend = HttpBackend::from_config(&cfg)?;
            let operation = backend.get_operation(&name).await?;
            println!("{}", serde_json::to_string_pretty(&operation)?);
        }
    }

    Ok(())
}
