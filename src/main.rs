// ABOUTME: Entry point for the flotilla CLI application.
// ABOUTME: Parses arguments and dispatches to the control plane.

mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use flotilla::config::{self, Config};
use flotilla::control::{ControlPlane, HealthTarget};
use flotilla::error::{Error, Result};
use flotilla::orchestrator::{HpaSpec, OrchestratorError};
use flotilla::output::{Output, OutputMode};
use flotilla::store::{DeploymentIntent, DeploymentStatus, TargetRef};
use flotilla::types::{AppName, ApplicationId, ServerId};
use futures::StreamExt;
use std::env;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let mut output = Output::new(OutputMode::from_flags(cli.json, cli.quiet));
    if let Err(e) = run(cli.command, &mut output).await {
        output.error(&e.to_string());
        std::process::exit(1);
    }
}

fn current_dir() -> Result<PathBuf> {
    Ok(env::current_dir()?)
}

async fn run(command: Commands, output: &mut Output) -> Result<()> {
    if let Commands::Init { name, image, force } = &command {
        let cwd = current_dir()?;
        config::init_config(&cwd, name.as_deref(), image.as_deref(), *force)?;
        output.success(&format!("Created {}", config::CONFIG_FILENAME));
        return Ok(());
    }

    let config = Config::discover(&current_dir()?)?;
    let control = ControlPlane::from_config(&config)?;
    let result = dispatch(command, &config, &control, output).await;
    control.shutdown().await;
    result
}

async fn dispatch(
    command: Commands,
    config: &Config,
    control: &ControlPlane,
    output: &mut Output,
) -> Result<()> {
    match command {
        Commands::Init { .. } => Ok(()),
        Commands::Health { server } => {
            let target = HealthTarget::Server(server.map(ServerId::new));
            let health = control.get_adapter_health(target).await?;
            let status = if health.health.healthy {
                "healthy"
            } else {
                "unhealthy"
            };
            output.report(
                &format!("{} ({}): {}", health.cluster, status, health.health.message),
                &health,
            );
            if health.health.healthy {
                Ok(())
            } else {
                Err(OrchestratorError::Connection(health.health.message).into())
            }
        }
        Commands::Detect { server } => {
            let id = ServerId::new(server);
            let cluster = control.detect(Some(&id)).await?;
            let capabilities = control.detect_capabilities(Some(&id)).await?;
            output.report(&format!("{}: {}", id, cluster), &capabilities);
            Ok(())
        }
        Commands::Deploy { app, redeploy } => {
            let id = application_id(config, &app)?;
            let intent = if redeploy {
                DeploymentIntent::Redeploy
            } else {
                DeploymentIntent::Deploy
            };
            output.start_timer();
            let handle = control
                .submit_deploy(TargetRef::Application(id), intent)
                .await?;
            let claimed = handle.claimed().await?;
            output.progress(&format!("Deploying {} ({})", app, claimed.id));
            let record = handle.finished().await?;
            match record.status {
                DeploymentStatus::Done => {
                    output.success(&format!("Deployed {}", app));
                    Ok(())
                }
                _ => Err(Error::DeploymentFailed(
                    record.error_message.unwrap_or_else(|| record.id.to_string()),
                )),
            }
        }
        Commands::Scale { app, replicas } => {
            let id = application_id(config, &app)?;
            let orchestrator = control.orchestrator(&HealthTarget::Application(id)).await?;
            orchestrator.scale_application(&app, replicas, None).await?;
            output.success(&format!("Scaled {} to {} replicas", app, replicas));
            Ok(())
        }
        Commands::Restart { app } => {
            let id = application_id(config, &app)?;
            let orchestrator = control.orchestrator(&HealthTarget::Application(id)).await?;
            orchestrator.restart_application(&app, None).await?;
            output.success(&format!("Restarted {}", app));
            Ok(())
        }
        Commands::Events { app, limit } => {
            let id = application_id(config, &app)?;
            let orchestrator = control.orchestrator(&HealthTarget::Application(id)).await?;
            let events: Vec<_> = orchestrator
                .get_events(&app, None)
                .await?
                .take(limit)
                .collect()
                .await;
            for event in &events {
                output.report(
                    &format!("{:?} {}: {}", event.kind, event.reason, event.message),
                    event,
                );
            }
            Ok(())
        }
        Commands::Autoscale { app, min, max, cpu } => {
            let id = application_id(config, &app)?;
            let orchestrator = control.orchestrator(&HealthTarget::Application(id)).await?;
            let spec = HpaSpec {
                target: AppName::new(&app).map_err(|e| Error::Validation(e.to_string()))?,
                namespace: None,
                min_replicas: min,
                max_replicas: max,
                target_cpu_percent: cpu,
                target_memory_percent: None,
                behavior: None,
            };
            orchestrator.autoscaling()?.configure_hpa(&spec).await?;
            output.success(&format!("Autoscaling {} between {} and {}", app, min, max));
            Ok(())
        }
    }
}

fn application_id(config: &Config, app: &str) -> Result<ApplicationId> {
    config
        .application(app)
        .map(|a| ApplicationId::new(a.name.as_str()))
        .ok_or_else(|| Error::NotFound {
            entity: "application",
            id: app.to_string(),
        })
}
