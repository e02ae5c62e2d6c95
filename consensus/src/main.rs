//! Command-line front end for the ensemble consensus engine
//!
//! # Usage
//!
//! ```bash
//! # Validate with the default ensemble, state under ./.ensemble-consensus
//! ensemble-consensus validate --operation Bash --payload "rm -rf target"
//!
//! # Feed back the real outcome of a decision
//! ensemble-consensus feedback --request-id <id> --failure
//!
//! # Custom configuration
//! CONSENSUS_METHOD=median ensemble-consensus --config consensus.toml report
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use ensemble_consensus::{
    AdaptationContext, ConsensusMethod, EngineConfig, ValidationRequest, ValidationService,
};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file; CONSENSUS_* variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// State directory (overrides store.path)
    #[arg(long, global = true)]
    state_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the ensemble on one operation and print the decision
    Validate {
        /// Tool or operation name, e.g. Bash, Write, Read
        #[arg(long)]
        operation: String,

        /// Operation payload
        #[arg(long, default_value = "")]
        payload: String,

        /// Consensus method (defaults to the configured one)
        #[arg(long)]
        method: Option<ConsensusMethod>,

        /// Explicit request id
        #[arg(long)]
        request_id: Option<String>,
    },

    /// Record the real outcome of an earlier decision
    Feedback {
        #[arg(long)]
        request_id: String,

        #[arg(long, conflicts_with = "failure")]
        success: bool,

        #[arg(long)]
        failure: bool,
    },

    /// Print the thresholds for a context
    Thresholds {
        #[arg(long)]
        complexity: Option<f64>,
        #[arg(long)]
        expertise: Option<f64>,
        #[arg(long)]
        criticality: Option<f64>,
        #[arg(long)]
        time_pressure: Option<f64>,
        #[arg(long)]
        success_rate: Option<f64>,
    },

    /// Threshold performance report
    Report,

    /// Population health report
    Health,

    /// Telemetry dashboard
    Dashboard,

    /// Print the effective configuration
    Config,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_config(args: &Args) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    config.apply_env();
    if let Some(path) = &args.state_path {
        config.store.path = path.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Command::Config = args.command {
        return print_json(&config);
    }

    tracing::info!(
        backend = ?config.store.backend,
        path = %config.store.path.display(),
        "Opening state store"
    );
    let service = ValidationService::from_config(config).context("Failed to start validation service")?;

    match args.command {
        Command::Validate {
            operation,
            payload,
            method,
            request_id,
        } => {
            let mut request = ValidationRequest::new(operation, payload);
            if let Some(id) = request_id {
                request = request.with_id(id);
            }
            let decision = match method {
                Some(method) => service.validate_with(request, method).await,
                None => service.validate(request).await,
            };
            service.flush_telemetry().await;
            print_json(&decision)
        }
        Command::Feedback {
            request_id,
            success,
            failure,
        } => {
            if !success && !failure {
                anyhow::bail!("Pass either --success or --failure");
            }
            let cycle = service.record_feedback(&request_id, success).await?;
            print_json(&cycle)
        }
        Command::Thresholds {
            complexity,
            expertise,
            criticality,
            time_pressure,
            success_rate,
        } => {
            let defaults = AdaptationContext::default();
            let context = AdaptationContext {
                tool_complexity: complexity.unwrap_or(defaults.tool_complexity),
                user_expertise: expertise.unwrap_or(defaults.user_expertise),
                project_criticality: criticality.unwrap_or(defaults.project_criticality),
                time_pressure: time_pressure.unwrap_or(defaults.time_pressure),
                past_success_rate: success_rate.unwrap_or(defaults.past_success_rate),
            }
            .normalized();
            print_json(&service.thresholds(&context).await)
        }
        Command::Report => print_json(&service.performance_report().await),
        Command::Health => match service.health_report().await {
            Some(report) => print_json(&report),
            None => {
                println!("No consensus history yet");
                Ok(())
            }
        },
        Command::Dashboard => print_json(&service.dashboard().await),
        Command::Config => Ok(()),
    }
}
