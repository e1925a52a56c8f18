use anyhow::{anyhow, Result};
use clap::{Arg, ArgAction, Command};
use std::path::PathBuf;
use tracing::{error, info};

use audit_chain::audit::verify::{detect_sequence_gaps, find_tampered_entries, verify_chain};
use audit_chain::config::CollectorConfig;
use audit_chain::ledger::Ledger;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let matches = Command::new("verify-chain")
        .version("0.1.0")
        .about("Walk the whole audit chain and report any alteration, deletion or reordering")
        .arg(
            Arg::new("database-url")
                .short('d')
                .long("database-url")
                .value_name("URL")
                .help("Ledger database (defaults to the configured database_url)"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("PATH")
                .help("Config file holding both secrets"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Enable verbose output"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .help("Suppress output except errors"),
        )
        .get_matches();

    let verbose = matches.get_flag("verbose");
    let quiet = matches.get_flag("quiet");

    // Set log level based on flags
    let level = if quiet {
        tracing::Level::ERROR
    } else if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let config_path = matches.get_one::<String>("config").map(PathBuf::from);
    let config = CollectorConfig::load_from(config_path.as_deref())?;
    let database_url = matches
        .get_one::<String>("database-url")
        .cloned()
        .unwrap_or_else(|| config.database_url.clone());

    if let Err(e) = verify(&database_url, &config, verbose, quiet).await {
        error!("Audit chain verification failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

async fn verify(database_url: &str, config: &CollectorConfig, verbose: bool, quiet: bool) -> Result<()> {
    info!("Verifying audit chain in {}", database_url);

    let ledger = Ledger::open_existing(database_url).await?;
    let entries = ledger.all().await?;
    ledger.close().await;

    let keys = config.chain_keys();
    let report = verify_chain(&entries, &keys);

    if verbose {
        println!("{}", report.detailed_status());

        for gap in detect_sequence_gaps(&entries) {
            println!(
                "  gap: {} missing between {} and {}",
                gap.missing(),
                gap.after,
                gap.before
            );
        }

        if let (Some(first), Some(last)) = (entries.first(), entries.last()) {
            println!("  first entry: {}", first.summary());
            println!("  last entry: {}", last.summary());
        }
    }

    if !report.is_valid {
        let tampered = find_tampered_entries(&entries, &keys);
        if !tampered.is_empty() {
            error!("Entries whose content no longer matches their HMACs: {:?}", tampered);
        }
        return Err(anyhow!(report.summary()));
    }

    if !quiet {
        println!("{}", report.summary());
    }

    Ok(())
}
