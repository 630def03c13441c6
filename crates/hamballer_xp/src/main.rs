//! HamBaller XP proof tool
//!
//! Generates XP proofs through the configured proof service and manages the
//! local proof cache.

use clap::{Parser, Subcommand};
use hamballer_xp::{CacheSnapshot, XpConfig, XpVerificationService};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// HamBaller XP proof tool
#[derive(Parser, Debug)]
#[command(name = "hamballer-xp")]
#[command(version)]
#[command(about = "Generate and cache HamBaller XP proofs", long_about = None)]
struct Args {
    /// Proof cache directory (overrides HAMBALLER_CACHE_PATH)
    #[arg(long, global = true)]
    cache_path: Option<PathBuf>,

    /// Proof generation endpoint (overrides HAMBALLER_PROOF_ENDPOINT)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Bearer token for the proof endpoint
    #[arg(long, global = true, env = "HAMBALLER_PROOF_TOKEN", hide_env_values = true)]
    auth_token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate (or fetch from cache) a proof and print it as JSON
    Generate {
        /// Player identity
        subject: String,
        /// Claimed XP amount
        amount: u64,
        /// Run or session identifier
        context: String,
    },
    /// Print cache statistics
    Stats,
    /// Write every cached proof to a snapshot file
    Export {
        /// Output file
        output: PathBuf,
    },
    /// Load proofs from a snapshot file
    Import {
        /// Snapshot file
        input: PathBuf,
    },
    /// Remove every cached proof
    Clear,
    /// Remove expired proofs
    Sweep,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hamballer_xp=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let mut config = XpConfig::from_env();
    if let Some(path) = args.cache_path {
        config = config.with_cache_path(Some(path));
    }
    if let Some(endpoint) = args.endpoint {
        config = config.with_endpoint(endpoint);
    }
    if let Some(token) = args.auth_token {
        config = config.with_auth_token(token);
    }

    let service = XpVerificationService::from_config(config)?;

    match args.command {
        Command::Generate {
            subject,
            amount,
            context,
        } => {
            let artifact = service.generate_proof(&subject, amount, &context).await?;
            println!("{}", serde_json::to_string_pretty(&artifact)?);
        }
        Command::Stats => {
            let stats = service.cache_stats().await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Export { output } => {
            let snapshot = service
                .export_cached_proofs()
                .await
                .ok_or("failed to read proof cache")?;
            std::fs::write(&output, serde_json::to_vec_pretty(&snapshot)?)?;
            tracing::info!(
                entries = snapshot.entries.len(),
                path = %output.display(),
                "exported proof cache"
            );
        }
        Command::Import { input } => {
            let snapshot: CacheSnapshot = serde_json::from_slice(&std::fs::read(&input)?)?;
            let entries = snapshot.entries.len();
            if !service.import_cached_proofs(snapshot).await {
                return Err("failed to import proof cache snapshot".into());
            }
            tracing::info!(entries, path = %input.display(), "imported proof cache");
        }
        Command::Clear => {
            if !service.clear_cache().await {
                return Err("failed to clear proof cache".into());
            }
            tracing::info!("proof cache cleared");
        }
        Command::Sweep => {
            let removed = service.cache().sweep_expired().await;
            tracing::info!(removed, "swept expired proofs");
        }
    }

    service.cache().flush();
    Ok(())
}
