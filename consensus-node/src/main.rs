// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

// DiemBFT Local Cluster Node
//
// Boots `n` replicas in one process, connects them over an in-memory
// network, feeds client transactions and reports the committed ledgers.
//
// Usage:
//   cargo run -p consensus-node -- --replicas 4 --transactions 20
//
// Steps:
//   1. Load configuration from flags, an optional JSON file and environment
//   2. Derive one deterministic key per replica
//   3. Start one runtime task per replica
//   4. Submit client transactions to every replica
//   5. Run until the duration elapses or Ctrl+C, then shut down
//   6. Compare the committed ledgers

mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use consensus_core::runtime::ConsensusEvent;
use consensus_core::{
    ConsensusError, LocalNetwork, ReplicaRuntime, RoundManager, Transaction, ValidatorSet,
};
use consensus_traits::{ReplicaId, ValidatorSigner, ValidatorVerifier};
use tokio::signal;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use config::{Command, NodeConfig, DATA_DIR_ENV, LOG_LEVEL_ENV};

/// Seed of the deterministic validator keys.
const KEY_SEED: u64 = 42;

/// Print usage information.
fn print_usage() {
    println!("DiemBFT Local Cluster v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("USAGE:");
    println!("    consensus-node [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -c, --config <PATH>          JSON configuration file");
    println!(
        "    -n, --replicas <N>           Number of replicas [default: {}]",
        config::DEFAULT_NUM_REPLICAS
    );
    println!(
        "    -t, --transactions <N>       Client transactions to submit [default: {}]",
        config::DEFAULT_NUM_TRANSACTIONS
    );
    println!(
        "        --duration-ms <MS>       Run time before shutdown [default: {}]",
        config::DEFAULT_RUN_DURATION_MS
    );
    println!("        --block-size <N>         Maximum transactions per block");
    println!("        --gst-ms <MS>            Estimated network delay after GST");
    println!("        --data-dir <PATH>        Keep safety state and ledgers under PATH");
    println!("        --isolate <ID>           Cut a replica off from the network (repeatable)");
    println!(
        "        --log-level <LEVEL>      Log level (trace|debug|info|warn|error) [default: {}]",
        config::DEFAULT_LOG_LEVEL
    );
    println!("    -h, --help                   Print this help information");
    println!();
    println!("ENVIRONMENT VARIABLES:");
    println!("    {}          Log level", LOG_LEVEL_ENV);
    println!("    {}           Data directory", DATA_DIR_ENV);
    println!("    RUST_LOG                     Per-module log filters");
}

/// Initialize logging. `RUST_LOG` refines the configured level.
fn init_logging(config: &NodeConfig) {
    let _ = env_logger::Builder::new()
        .filter_level(config.log_filter())
        .parse_default_env()
        .format_timestamp_millis()
        .try_init();
}

/// Client transactions, spread over a few clients.
fn client_transactions(count: usize) -> Vec<Transaction> {
    (0..count)
        .map(|i| {
            Transaction::new(
                format!("txn-{}", i),
                format!("client-{}", i % 3),
                format!("set k{} {}", i, i),
            )
        })
        .collect()
}

struct Replica {
    events: UnboundedSender<ConsensusEvent>,
    handle: JoinHandle<Result<RoundManager, ConsensusError>>,
}

/// Start one runtime per replica, each with `transactions` already queued so
/// that the first leader has something to propose.
fn spawn_cluster(
    config: &NodeConfig,
    transactions: &[Transaction],
) -> anyhow::Result<Vec<Replica>> {
    let (validators, signers) = ValidatorSet::generate(config.num_replicas, KEY_SEED);
    let verifier: Arc<dyn ValidatorVerifier> = Arc::new(validators);

    let mesh = LocalNetwork::mesh(config.num_replicas);
    let (network, _) = mesh.first().context("Cluster has no replicas")?;
    for id in &config.isolated {
        log::warn!("Isolating replica {}", id);
        network.isolate(ReplicaId(*id));
    }

    let mut replicas = Vec::with_capacity(config.num_replicas);
    for ((network, channel), signer) in mesh.into_iter().zip(signers) {
        let signer: Arc<dyn ValidatorSigner> = Arc::new(signer);
        let author = signer.author();
        let replica_config = config.replica_config(author.0);
        if let Some(dir) = &replica_config.data_dir {
            log::info!("[replica {}] Data directory: {}", author, dir.display());
        }
        let mut round_manager = RoundManager::from_config(replica_config, signer, verifier.clone())
            .with_context(|| format!("Failed to initialize replica {}", author))?;
        for txn in transactions {
            round_manager.submit_transaction(txn.clone());
        }

        let runtime = ReplicaRuntime::new(round_manager, network, channel);
        replicas.push(Replica {
            events: runtime.event_sender(),
            handle: tokio::spawn(runtime.run()),
        });
    }
    Ok(replicas)
}

/// Log each ledger and check that every pair agrees on its common prefix.
fn report(ledgers: &[(ReplicaId, RoundManager)]) -> bool {
    for (author, round_manager) in ledgers {
        let ledger = round_manager.ledger();
        let commands: usize = ledger
            .committed_blocks()
            .iter()
            .map(|committed| committed.block.payload().len())
            .sum();
        log::info!(
            "[replica {}] Round {}: {} committed blocks, {} commands, rounds {:?}",
            author,
            round_manager.current_round(),
            ledger.committed_blocks().len(),
            commands,
            ledger.committed_rounds()
        );
    }

    let mut consistent = true;
    for (i, (a, left)) in ledgers.iter().enumerate() {
        for (b, right) in &ledgers[i + 1..] {
            let left = left.ledger().committed_blocks();
            let right = right.ledger().committed_blocks();
            let common = left.len().min(right.len());
            let diverged = left[..common]
                .iter()
                .zip(&right[..common])
                .any(|(x, y)| x.block.id() != y.block.id());
            if diverged {
                log::error!("Replicas {} and {} committed different blocks", a, b);
                consistent = false;
            }
        }
    }
    consistent
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let mut config = match NodeConfig::from_args(&args)? {
        Command::Run(config) => config,
        Command::Help => {
            print_usage();
            return Ok(());
        },
    };
    config.apply_env();

    init_logging(&config);
    log::info!("DiemBFT Local Cluster v{} starting", env!("CARGO_PKG_VERSION"));
    log::info!("Configuration: {:?}", config);
    config.validate()?;

    let transactions = client_transactions(config.num_transactions);
    let replicas = spawn_cluster(&config, &transactions)?;
    log::info!(
        "Submitted {} transactions to {} replicas",
        transactions.len(),
        replicas.len()
    );

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_millis(config.run_duration_ms)) => {
            log::info!("Run time elapsed, shutting down");
        }
        _ = signal::ctrl_c() => {
            log::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
    }

    for replica in &replicas {
        let _ = replica.events.send(ConsensusEvent::Shutdown);
    }
    let results =
        futures::future::join_all(replicas.into_iter().map(|replica| replica.handle)).await;

    let mut ledgers = Vec::new();
    for (index, result) in results.into_iter().enumerate() {
        match result {
            Ok(Ok(round_manager)) => ledgers.push((round_manager.author(), round_manager)),
            Ok(Err(e)) => log::error!("[replica {}] Halted: {}", index, e),
            Err(e) => log::error!("[replica {}] Task failed: {}", index, e),
        }
    }

    if !report(&ledgers) {
        anyhow::bail!("Committed ledgers diverged");
    }
    log::info!("Shutdown complete");
    Ok(())
}
