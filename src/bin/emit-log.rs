use anyhow::{anyhow, Result};
use clap::Parser;
use serde_json::Value;
use std::path::PathBuf;

use audit_chain::audit::LogLevel;
use audit_chain::config::EmitterConfig;
use audit_chain::emitter::{EmitOutcome, LogEmitter};

/// Send one record to the audit collector and report what happened to it.
#[derive(Parser, Debug)]
#[command(name = "emit-log", version, about)]
struct Args {
    /// info, warn or error
    level: LogLevel,

    message: String,

    /// Metadata as a JSON object
    #[arg(short, long, default_value = "{}")]
    metadata: String,

    /// Config file holding collector_url and emitter_secret
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "audit_chain=info".into()),
        )
        .init();

    let args = Args::parse();

    let metadata: Value = serde_json::from_str(&args.metadata)
        .map_err(|e| anyhow!("--metadata is not valid JSON: {}", e))?;

    let config = EmitterConfig::load_from(args.config.as_deref())?;
    let (emitter, worker) = LogEmitter::spawn(&config)?;

    let outcome = emitter.deliver(args.level, args.message, metadata).await;
    drop(emitter);
    let _ = worker.await;

    match outcome {
        EmitOutcome::Logged(sequence_number) => {
            println!("logged as entry {}", sequence_number);
            Ok(())
        }
        EmitOutcome::Rejected(rejection) => Err(anyhow!("collector refused record: {}", rejection)),
        EmitOutcome::Undelivered(reason) => Err(anyhow!("collector unreachable: {}", reason)),
    }
}
