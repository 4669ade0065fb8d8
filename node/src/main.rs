use anyhow::{anyhow, Context, Result};
use clap::{value_parser, Arg, ArgAction, Command};
use fs2::FileExt;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use poet_crypto::{HashKind, MerkleTree};
use poet_prover::{Prover, ShutdownSignal, Verifier};
use poet_service::{from_target, RoundManager};
use poet_storage::{member_key, SledRoundStore};
use poet_types::{label_from_slice, PoetProofMessage};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod app_config;
mod version;

use app_config::{load_config_with_overrides, standalone_label_path, AppConfig};
use version::{format_versions, git_commit_hash, POET_VERSION};

/// How long `run` waits for executing rounds to checkpoint after Ctrl-C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

fn cli() -> Command {
    Command::new("poet-node")
        .version(POET_VERSION)
        .about("Proof-of-Elapsed-Time service")
        .disable_version_flag(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .global(true),
        )
        .arg(
            Arg::new("data-dir")
                .short('d')
                .long("data-dir")
                .value_name("DIR")
                .help("Data directory")
                .global(true),
        )
        .arg(
            Arg::new("version_flag")
                .short('V')
                .long("version")
                .action(ArgAction::SetTrue)
                .help("Print detailed version information and exit")
                .global(true),
        )
        .arg(
            Arg::new("n")
                .short('n')
                .long("security-param")
                .value_name("N")
                .value_parser(value_parser!(u32))
                .help("Security parameter; the DAG has 2^(n+1)-1 labels")
                .global(true),
        )
        .arg(
            Arg::new("hash")
                .long("hash")
                .value_name("FUNCTION")
                .value_parser(value_parser!(HashKind))
                .help("Hash function (sha256, blake3)")
                .global(true),
        )
        .arg(
            Arg::new("round-duration")
                .long("round-duration")
                .value_name("SECS")
                .value_parser(value_parser!(u64))
                .help("Round duration in seconds")
                .global(true),
        )
        .arg(
            Arg::new("challenge-count")
                .long("challenge-count")
                .value_name("K")
                .value_parser(value_parser!(usize))
                .help("Leaves opened per proof")
                .global(true),
        )
        .arg(
            Arg::new("broadcast-target")
                .long("broadcast-target")
                .value_name("URL")
                .help("Where finished proofs are POSTed, or NO_BROADCAST")
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .help("Override the log level")
                .global(true),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .value_parser(["pretty", "json"])
                .help("Select log output format")
                .global(true),
        )
        .arg(
            Arg::new("metrics")
                .long("metrics")
                .action(ArgAction::SetTrue)
                .help("Install the Prometheus metrics exporter")
                .global(true),
        )
        .subcommand(Command::new("run").about("Run the round service (default)"))
        .subcommand(
            Command::new("prove")
                .about("Compute a standalone non-interactive proof for a statement")
                .arg(
                    Arg::new("statement")
                        .long("statement")
                        .value_name("HEX")
                        .required(true)
                        .help("32-byte statement, hex encoded"),
                )
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .value_name("FILE")
                        .required(true)
                        .help("Where to write the encoded proof message"),
                ),
        )
        .subcommand(
            Command::new("verify")
                .about("Verify an encoded proof message")
                .arg(
                    Arg::new("proof")
                        .long("proof")
                        .value_name("FILE")
                        .required(true)
                        .help("Encoded proof message to verify"),
                ),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    let (name, sub_matches) = match matches.subcommand() {
        Some((name, sub_matches)) => (name, sub_matches),
        None => ("run", &matches),
    };

    let config = load_config_with_overrides(sub_matches)?;
    if sub_matches.get_flag("version_flag") {
        print_version_info(&config);
        return Ok(());
    }
    init_logging(&config)?;

    match name {
        "run" => run_service(config).await,
        "prove" => run_prove(&config, sub_matches).await,
        "verify" => run_verify(&config, sub_matches),
        other => Err(anyhow!("unknown subcommand {other}")),
    }
}

async fn run_service(config: AppConfig) -> Result<()> {
    let _lock = DataDirLock::acquire(&config.data_dir, "service")?;
    let _metrics = init_metrics(&config);

    let service_config = config.service_config();
    let store = SledRoundStore::open(service_config.db_path()).with_context(|| {
        format!(
            "failed to open round database at {}",
            service_config.db_path().display()
        )
    })?;
    let broadcaster = from_target(&config.broadcast_target, config.broadcast_timeout())?;
    let signal = ShutdownSignal::new();
    let manager = RoundManager::new(service_config, Arc::new(store), broadcaster, signal)?;
    manager.start()?;

    info!(
        version = POET_VERSION,
        n = config.n,
        hash = %config.hash_function,
        round_duration_secs = config.round_duration_secs,
        data_dir = %config.data_dir.display(),
        broadcast_target = %config.broadcast_target,
        "PoET service started"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    manager.shutdown();

    let deadline = Instant::now() + SHUTDOWN_GRACE;
    loop {
        let executing = manager.info().executing_round_ids;
        if executing.is_empty() {
            break;
        }
        if Instant::now() >= deadline {
            warn!(?executing, "rounds still executing at exit; they resume on next start");
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    info!("PoET service stopped");
    Ok(())
}

async fn run_prove(config: &AppConfig, matches: &clap::ArgMatches) -> Result<()> {
    let statement_hex = matches
        .get_one::<String>("statement")
        .ok_or_else(|| anyhow!("--statement is required"))?;
    let output = matches
        .get_one::<String>("output")
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("--output is required"))?;
    let statement = hex::decode(statement_hex.trim())
        .ok()
        .as_deref()
        .and_then(label_from_slice)
        .ok_or_else(|| anyhow!("statement must be 32 bytes of hex"))?;

    let _lock = DataDirLock::acquire(&config.data_dir, "prove")?;
    let params = config.service_config().params();
    let path = standalone_label_path(&config.data_dir, &hex::encode(statement));
    let signal = ShutdownSignal::new();

    let compute = {
        let signal = signal.clone();
        tokio::task::spawn_blocking(move || -> Result<PoetProofMessage> {
            let mut prover = Prover::open(statement, params, &path)?;
            let started = Instant::now();
            let phi = prover.compute(&signal)?;
            let (challenge, proof) = prover.nip()?;
            info!(
                phi = %hex::encode(phi),
                openings = challenge.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "proof computed"
            );
            prover.clean()?;
            Ok(PoetProofMessage {
                round_id: "standalone".to_string(),
                statement,
                members: Vec::new(),
                proof,
            })
        })
    };

    let message = tokio::select! {
        joined = compute => joined.context("prover task failed")??,
        _ = tokio::signal::ctrl_c() => {
            signal.request_shutdown();
            anyhow::bail!("interrupted; rerun the same command to resume");
        }
    };

    fs::write(&output, message.to_bytes()?)
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!("{}", hex::encode(message.proof.phi));
    Ok(())
}

fn run_verify(config: &AppConfig, matches: &clap::ArgMatches) -> Result<()> {
    let path = matches
        .get_one::<String>("proof")
        .ok_or_else(|| anyhow!("--proof is required"))?;
    let bytes = fs::read(path).with_context(|| format!("failed to read {path}"))?;
    let message = PoetProofMessage::from_bytes(&bytes)?;

    if !message.members.is_empty() {
        check_member_order(&message.members)?;
        let root = MerkleTree::root_of(config.hash_function, &message.members)?;
        if root != message.statement {
            anyhow::bail!("statement does not commit to the listed members");
        }
    }

    let verifier = Verifier::new(message.statement, config.service_config().params())?;
    if !verifier.verify_nip(&message.proof) {
        anyhow::bail!("proof for round {} is invalid", message.round_id);
    }
    println!(
        "valid: round {} phi {} ({} members)",
        message.round_id,
        hex::encode(message.proof.phi),
        message.members.len()
    );
    Ok(())
}

/// Members are committed once each, ordered by member hash.
fn check_member_order(members: &[Vec<u8>]) -> Result<()> {
    for pair in members.windows(2) {
        if member_key(&pair[0]) >= member_key(&pair[1]) {
            anyhow::bail!("member list is not in canonical order or repeats a member");
        }
    }
    Ok(())
}

fn init_metrics(config: &AppConfig) -> Option<PrometheusHandle> {
    if !config.metrics_enabled {
        info!("Prometheus metrics exporter disabled via configuration");
        return None;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            info!("Prometheus metrics exporter registered");
            poet_service::metrics::describe();
            Some(handle)
        }
        Err(err) => {
            warn!("Failed to install Prometheus metrics exporter: {}", err);
            None
        }
    }
}

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().compact().with_ansi(false))
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()?;
    }

    Ok(())
}

fn print_version_info(config: &AppConfig) {
    println!(
        "poet-node {} (commit {}) [{}; n={} hash={}]",
        POET_VERSION,
        git_commit_hash(),
        format_versions(),
        config.n,
        config.hash_function
    );
}

struct DataDirLock {
    path: PathBuf,
    file: File,
}

impl DataDirLock {
    fn acquire<P: AsRef<Path>>(data_dir: P, purpose: &str) -> Result<Self> {
        let dir = data_dir.as_ref();
        fs::create_dir_all(dir)?;
        let lock_path = dir.join(".poet.lock");
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&lock_path)?;

        if let Err(err) = file.try_lock_exclusive() {
            return Err(anyhow!(
                "Data directory {} is locked by another process ({}). \
                 Stop the running service or remove {} if you are sure it is stale.",
                dir.display(),
                err,
                lock_path.display()
            ));
        }

        let started_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis())
            .unwrap_or_default();
        file.set_len(0)?;
        writeln!(
            &file,
            "pid={};purpose={};started_ms={}",
            std::process::id(),
            purpose,
            started_ms
        )?;

        Ok(Self {
            path: lock_path,
            file,
        })
    }
}

impl Drop for DataDirLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn cli_definition_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn cli_overrides_apply_to_subcommands() {
        let matches = cli()
            .try_get_matches_from([
                "poet-node",
                "prove",
                "--statement",
                "00",
                "--output",
                "out.bin",
                "-n",
                "7",
                "--hash",
                "blake3",
                "--round-duration",
                "2",
            ])
            .unwrap();
        let (_, sub) = matches.subcommand().unwrap();
        let mut config = AppConfig::default();
        app_config::apply_overrides(sub, &mut config);
        assert_eq!(config.n, 7);
        assert_eq!(config.hash_function, HashKind::Blake3);
        assert_eq!(config.round_duration_secs, 2);
    }

    #[test]
    fn data_dir_lock_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let lock = DataDirLock::acquire(dir.path(), "test").unwrap();
        assert!(DataDirLock::acquire(dir.path(), "test").is_err());
        drop(lock);
        DataDirLock::acquire(dir.path(), "test").unwrap();
    }

    #[tokio::test]
    async fn prove_then_verify_roundtrip() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("proof.bin");
        let config = AppConfig {
            n: 6,
            challenge_count: 10,
            data_dir: dir.path().join("data"),
            ..Default::default()
        };
        let statement = hex::encode([0x42u8; 32]);
        let output_arg = output.to_string_lossy().to_string();

        let prove = cli()
            .try_get_matches_from([
                "poet-node",
                "prove",
                "--statement",
                statement.as_str(),
                "--output",
                output_arg.as_str(),
            ])
            .unwrap();
        let (_, prove) = prove.subcommand().unwrap();
        run_prove(&config, prove).await.unwrap();
        assert!(!standalone_label_path(&config.data_dir, &statement).exists());

        let verify = cli()
            .try_get_matches_from(["poet-node", "verify", "--proof", output_arg.as_str()])
            .unwrap();
        let (_, verify) = verify.subcommand().unwrap();
        run_verify(&config, verify).unwrap();

        let mut bytes = fs::read(&output).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&output, bytes).unwrap();
        assert!(run_verify(&config, verify).is_err());
    }

    #[test]
    fn verify_requires_canonical_member_list() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig {
            n: 5,
            challenge_count: 8,
            data_dir: dir.path().join("data"),
            ..Default::default()
        };
        let mut members: Vec<Vec<u8>> = vec![b"alpha".to_vec(), b"beta".to_vec(), b"gamma".to_vec()];
        members.sort_by_key(|member| member_key(member));
        let statement = MerkleTree::root_of(config.hash_function, &members).unwrap();

        let params = config.service_config().params();
        let mut prover = Prover::open(statement, params, dir.path().join("round.labels")).unwrap();
        prover.compute(&ShutdownSignal::new()).unwrap();
        let (_, proof) = prover.nip().unwrap();

        let verify_with = |listed: Vec<Vec<u8>>| {
            let path = dir.path().join("proof.bin");
            let message =
                PoetProofMessage::new(poet_types::RoundId(1), statement, listed, proof.clone());
            fs::write(&path, message.to_bytes().unwrap()).unwrap();
            let path = path.to_string_lossy().to_string();
            let matches = cli()
                .try_get_matches_from(["poet-node", "verify", "--proof", path.as_str()])
                .unwrap();
            let (_, verify) = matches.subcommand().unwrap();
            run_verify(&config, verify)
        };

        verify_with(members.clone()).unwrap();

        let mut repeated = members.clone();
        repeated.push(members[2].clone());
        assert!(verify_with(repeated).is_err());

        let mut reversed = members.clone();
        reversed.reverse();
        assert!(verify_with(reversed).is_err());
        assert!(check_member_order(&members).is_ok());
    }
}
