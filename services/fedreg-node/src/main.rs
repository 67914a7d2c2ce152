//! fedreg-node - command-line front end for the training-round registry
//!
//! Central (owner) and hospital (participant) flows against a SQLite-backed
//! registry, plus a ledger listener and an in-memory demo.

mod demo;
mod deployment;
mod listen;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use deployment::Deployment;
use fedreg_core::config::ClockKind;
use fedreg_core::{
    logging, Clock, Config, Digest32, Identity, ManualClock, ModelVersion, RoundId, SqliteLedger,
    SystemClock,
};
use fedreg_registry::{RegistryCore, RegistryError, TracingSink};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

const DEFAULT_ROUND_DURATION: u64 = 3600;

// ==================== CLI ====================

#[derive(Parser)]
#[command(name = "fedreg-node")]
#[command(about = "Federated-learning round registry node", version)]
struct Cli {
    /// TOML config file; built-in defaults when omitted
    #[arg(long, global = true, env = "FEDREG_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the ledger, record the owner and write the deployment record
    Deploy,
    /// Open a new training round (owner only)
    CreateRound {
        #[arg(long = "as")]
        caller: Identity,
        /// Defaults to the current Unix time in milliseconds
        #[arg(long)]
        round_id: Option<RoundId>,
        /// Label such as `v1.0`, or 0x-prefixed 32-byte hex
        #[arg(long, value_parser = parse_model_version)]
        model_version: ModelVersion,
        #[command(flatten)]
        deadline: DeadlineArgs,
    },
    /// Submit a participant's update for a round
    Submit {
        #[arg(long = "as")]
        caller: Identity,
        #[arg(long, env = "ROUND_ID")]
        round_id: RoundId,
        #[arg(long, value_parser = parse_model_version)]
        model_version: ModelVersion,
        #[command(flatten)]
        update: UpdateArgs,
    },
    /// Close a round with its aggregation result (owner only)
    Finalize {
        #[arg(long = "as")]
        caller: Identity,
        #[arg(long, env = "ROUND_ID")]
        round_id: RoundId,
        #[arg(long, value_parser = parse_digest)]
        aggregated_hash: Digest32,
        #[arg(long, value_parser = parse_model_version)]
        new_model_version: ModelVersion,
    },
    /// Show one participant's submission for a round
    Submission {
        #[arg(long)]
        participant: Identity,
        #[arg(long, env = "ROUND_ID")]
        round_id: RoundId,
    },
    /// Show a round and its submissions
    Round {
        #[arg(long, env = "ROUND_ID")]
        round_id: RoundId,
    },
    /// Print registry events as they are committed, until interrupted
    Listen {
        /// First ledger sequence number to print
        #[arg(long = "from", default_value_t = 1)]
        from_seq_no: u64,
        #[arg(long, default_value_t = 500)]
        poll_ms: u64,
    },
    /// Run a complete round against an in-memory registry
    Demo,
}

#[derive(Args)]
#[group(multiple = false)]
struct DeadlineArgs {
    /// Seconds from now until the submission deadline
    #[arg(long)]
    duration: Option<u64>,
    /// Absolute deadline (Unix seconds)
    #[arg(long)]
    deadline: Option<u64>,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct UpdateArgs {
    /// Precomputed 0x-prefixed 32-byte update hash
    #[arg(long, value_parser = parse_digest)]
    update_hash: Option<Digest32>,
    /// Update payload; hashed locally with BLAKE3
    #[arg(long)]
    update_file: Option<PathBuf>,
}

fn parse_model_version(s: &str) -> std::result::Result<ModelVersion, String> {
    ModelVersion::parse(s).map_err(|e| e.to_string())
}

fn parse_digest(s: &str) -> std::result::Result<Digest32, String> {
    Digest32::from_hex(s).map_err(|e| e.to_string())
}

// ==================== Main ====================

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };
    logging::init_with(&config.logging);

    match run(cli.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(rejection) = rejection(&e) {
                eprintln!("rejected: {}", rejection);
                return ExitCode::from(2);
            }
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// The registry rule that refused the command, if that is what failed.
///
/// Ledger, deployment and replay failures are not rejections and exit with
/// the generic failure status.
fn rejection(e: &anyhow::Error) -> Option<&RegistryError> {
    e.downcast_ref::<RegistryError>().filter(|err| err.is_rejection())
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(Config::default_config()),
    }
}

async fn run(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Deploy => deploy(config),
        Commands::CreateRound {
            caller,
            round_id,
            model_version,
            deadline,
        } => {
            let registry = open_registry(config)?;
            let round_id = round_id.unwrap_or_else(|| RoundId::from(unix_millis()));
            let deadline = resolve_deadline(registry.now(), &deadline)?;

            let receipt = registry.create_round(&caller, round_id, model_version, deadline)?;
            println!("Round created");
            println!("  - roundId : {}", round_id);
            println!("  - modelV  : {}", model_version.to_hex());
            println!("  - deadline: {}", deadline);
            println!("  - txHash  : {}", receipt.tx_hash);
            println!("\nParticipants should submit using this roundId:");
            println!("{}", round_id);
            Ok(())
        }
        Commands::Submit {
            caller,
            round_id,
            model_version,
            update,
        } => {
            let update_hash = match (update.update_hash, update.update_file) {
                (Some(hash), _) => hash,
                (None, Some(path)) => hash_file(&path)?,
                (None, None) => bail!("one of --update-hash or --update-file is required"),
            };
            let registry = open_registry(config)?;
            let receipt = registry.submit_update(&caller, round_id, model_version, update_hash)?;
            println!("Submitted");
            println!("  - participant: {}", caller);
            println!("  - roundId    : {}", round_id);
            println!("  - updateHash : {}", update_hash);
            println!("  - txHash     : {}", receipt.tx_hash);

            let submission = registry.get_submission(&caller, round_id)?;
            println!("\ngetSubmission result:");
            println!("{}", serde_json::to_string_pretty(&submission)?);
            Ok(())
        }
        Commands::Finalize {
            caller,
            round_id,
            aggregated_hash,
            new_model_version,
        } => {
            let registry = open_registry(config)?;
            let receipt =
                registry.finalize_round(&caller, round_id, aggregated_hash, new_model_version)?;
            println!("Round finalized");
            println!("  - roundId        : {}", round_id);
            println!("  - newModelVersion: {}", new_model_version);
            println!("  - txHash         : {}", receipt.tx_hash);
            Ok(())
        }
        Commands::Submission {
            participant,
            round_id,
        } => {
            let registry = open_registry(config)?;
            let submission = registry.get_submission(&participant, round_id)?;
            println!("{}", serde_json::to_string_pretty(&submission)?);
            Ok(())
        }
        Commands::Round { round_id } => {
            let registry = open_registry(config)?;
            let Some(round) = registry.get_round(round_id)? else {
                bail!("round {} does not exist", round_id);
            };
            let submissions = registry.list_submissions(round_id)?.unwrap_or_default();
            let view = serde_json::json!({
                "round": round,
                "phase": round.phase(registry.now()),
                "submissions": submissions,
            });
            println!("{}", serde_json::to_string_pretty(&view)?);
            Ok(())
        }
        Commands::Listen {
            from_seq_no,
            poll_ms,
        } => {
            let ledger_path = resolve_ledger(config)?.0;
            listen::run(&ledger_path, from_seq_no, Duration::from_millis(poll_ms.max(10))).await
        }
        Commands::Demo => demo::run(),
    }
}

/// Absolute deadline from `--deadline`, or `now` plus `--duration`.
fn resolve_deadline(now: u64, args: &DeadlineArgs) -> Result<u64> {
    if let Some(at) = args.deadline {
        return Ok(at);
    }
    let duration = args.duration.unwrap_or(DEFAULT_ROUND_DURATION);
    match now.checked_add(duration) {
        Some(deadline) => Ok(deadline),
        None => bail!("--duration {} from {} overflows the deadline", duration, now),
    }
}

// ==================== Registry Access ====================

fn build_clock(config: &Config) -> Arc<dyn Clock> {
    match config.clock.source {
        ClockKind::System => Arc::new(SystemClock),
        ClockKind::Manual => Arc::new(ManualClock::new(config.clock.start)),
    }
}

/// Ledger path and expected owner, preferring the deployment record.
fn resolve_ledger(config: &Config) -> Result<(PathBuf, Option<Deployment>)> {
    match Deployment::load(&config.registry.deployment_file)? {
        Some(record) => Ok((record.ledger_path.clone(), Some(record))),
        None => Ok((config.registry.ledger_path.clone(), None)),
    }
}

fn deploy(config: &Config) -> Result<()> {
    let owner = Identity::new(config.registry.owner.as_str())?;
    let ledger_path = config.registry.ledger_path.clone();
    let ledger = SqliteLedger::open(&ledger_path)
        .with_context(|| format!("opening ledger {}", ledger_path.display()))?;

    let registry = RegistryCore::new(owner.clone(), build_clock(config), Box::new(ledger))?;
    let genesis = registry.genesis_receipt();

    let record = Deployment {
        registry_id: genesis.tx_hash.to_hex(),
        owner,
        ledger_path,
        deployed_at: genesis.timestamp,
    };
    record.save(&config.registry.deployment_file)?;

    println!("Registry deployed: {}", record.registry_id);
    println!("Saved -> {}", config.registry.deployment_file.display());
    Ok(())
}

fn open_registry(config: &Config) -> Result<RegistryCore> {
    let (ledger_path, record) = resolve_ledger(config)?;
    if !ledger_path.exists() {
        bail!(
            "no registry ledger at {}; run `fedreg-node deploy` first",
            ledger_path.display()
        );
    }

    let ledger = SqliteLedger::open(&ledger_path)
        .with_context(|| format!("opening ledger {}", ledger_path.display()))?;
    let expected_owner = record.as_ref().map(|r| &r.owner);
    let registry = RegistryCore::open(Box::new(ledger), build_clock(config), expected_owner)?;

    if let Some(record) = &record {
        let actual = registry.genesis_receipt().tx_hash.to_hex();
        if actual != record.registry_id {
            bail!(
                "ledger {} belongs to registry {}, deployment record says {}",
                ledger_path.display(),
                actual,
                record.registry_id
            );
        }
    }

    registry.subscribe(Arc::new(TracingSink))?;
    debug!(ledger = %ledger_path.display(), "Registry opened");
    info!(owner = %registry.owner(), rounds = registry.round_count()?, "Registry ready");
    Ok(registry)
}

fn hash_file(path: &Path) -> Result<Digest32> {
    let payload =
        std::fs::read(path).with_context(|| format!("reading update file {}", path.display()))?;
    let hash = Digest32::from(blake3::hash(&payload));
    debug!(file = %path.display(), bytes = payload.len(), hash = %hash, "Hashed update payload");
    Ok(hash)
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
