// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Progress under lost messages, crashed leaders and partitions.

use std::sync::Arc;
use std::time::Duration;

use consensus_core::liveness::PacemakerConfig;
use consensus_core::testing::{make_transactions, TestCluster};
use consensus_core::{
    ConsensusConfig, ConsensusEvent, LocalNetwork, ReplicaRuntime, Round, RoundManager,
    ValidatorSet,
};
use consensus_traits::{ReplicaId, ValidatorSigner, ValidatorVerifier};

const MAX_STEPS: usize = 10_000;

/// Two of four replicas time out. The other two join at f+1 timeouts,
/// which completes the certificate and moves everyone on.
#[test]
fn test_f_plus_one_timeouts_pull_in_the_rest() {
    let mut cluster = TestCluster::with_block_size(4, 2);
    cluster.submit_all(make_transactions(6));
    cluster.start();
    cluster.drop_pending();

    cluster.timeout(0).unwrap();
    cluster.timeout(1).unwrap();
    cluster.run(8).unwrap();
    // Replicas 2 and 3 each broadcast their own timeout
    assert_eq!(cluster.pending_messages(), 8);
    for index in 2..4 {
        assert_eq!(cluster.replica(index).safety_rules().highest_vote_round(), 0);
        assert_eq!(cluster.replica(index).current_round(), 0);
    }

    assert!(cluster.run(MAX_STEPS).unwrap() < MAX_STEPS);
    for rounds in cluster.committed_rounds() {
        assert_eq!(rounds.first(), Some(&1));
    }
    assert!(cluster.ledgers_agree());
}

/// Round timers double with every round left on a timeout certificate and
/// fall back to the base duration once a quorum certificate drives a round.
/// The crashed replica leads rounds 0 and 1, so only the certificate of
/// round 2 reaches a live leader.
#[test]
fn test_round_timer_backs_off_until_a_certificate() {
    let mut cluster = TestCluster::with_block_size(4, 2);
    cluster.submit_all(make_transactions(6));
    cluster.crash(0);
    cluster.start();

    cluster.timeout_all().unwrap();
    cluster.run(MAX_STEPS).unwrap();
    for index in 1..4 {
        let timer = cluster.replica(index).timer();
        assert_eq!(timer.round, 1);
        assert_eq!(timer.duration, Duration::from_millis(80));
    }

    // Three live broadcasts complete the second certificate
    cluster.timeout_all().unwrap();
    cluster.run(12).unwrap();
    for index in 1..4 {
        let timer = cluster.replica(index).timer();
        assert_eq!(timer.round, 2);
        assert_eq!(timer.duration, Duration::from_millis(160));
    }

    cluster.timeout_all().unwrap();
    assert!(cluster.run(MAX_STEPS).unwrap() < MAX_STEPS);
    for index in 1..4 {
        let replica = cluster.replica(index);
        assert!(!replica.ledger().committed_blocks().is_empty());
        assert_eq!(replica.timer().duration, Duration::from_millis(40));
    }
}

#[test]
fn test_idle_cluster_keeps_timing_out_without_committing() {
    let mut cluster = TestCluster::new(4);
    cluster.start();
    cluster.run(MAX_STEPS).unwrap();

    for expected_round in 1..4 {
        cluster.timeout_all().unwrap();
        cluster.run(MAX_STEPS).unwrap();
        for replica in cluster.replicas() {
            assert!(replica.current_round() >= expected_round);
            assert!(replica.ledger().committed_blocks().is_empty());
        }
    }
}

/// Start `n` replicas over one mesh with `isolated` cut off, reconnect it
/// after `heal_after` if given, and shut everyone down after `total`.
async fn run_mesh(
    n: usize,
    isolated: ReplicaId,
    heal_after: Option<Duration>,
    total: Duration,
) -> Vec<RoundManager> {
    let (validators, signers) = ValidatorSet::generate(n, 3);
    let verifier: Arc<dyn ValidatorVerifier> = Arc::new(validators);
    let mesh = LocalNetwork::mesh(n);
    let network = mesh[0].0.clone();
    network.isolate(isolated);

    let mut senders = Vec::new();
    let mut handles = Vec::new();
    for ((network, channel), signer) in mesh.into_iter().zip(signers) {
        let signer: Arc<dyn ValidatorSigner> = Arc::new(signer);
        let config = ConsensusConfig::new(signer.author().0, n)
            .with_block_size(2)
            .with_pacemaker(PacemakerConfig::new(20, 4, 1.5, 4, 0));
        let mut round_manager =
            RoundManager::from_config(config, signer, verifier.clone()).unwrap();
        for txn in make_transactions(6) {
            round_manager.submit_transaction(txn);
        }
        let runtime = ReplicaRuntime::new(round_manager, network, channel);
        senders.push(runtime.event_sender());
        handles.push(tokio::spawn(runtime.run()));
    }

    let mut elapsed = Duration::ZERO;
    if let Some(heal_after) = heal_after {
        tokio::time::sleep(heal_after).await;
        network.reconnect(isolated);
        elapsed = heal_after;
    }
    tokio::time::sleep(total.saturating_sub(elapsed)).await;
    for sender in &senders {
        sender.send(ConsensusEvent::Shutdown).unwrap();
    }

    let mut round_managers = Vec::new();
    for handle in handles {
        round_managers.push(handle.await.unwrap().unwrap());
    }
    round_managers
}

fn assert_consistent_commits(ledgers: &[Vec<Round>]) {
    for rounds in ledgers {
        assert!(!rounds.is_empty());
        assert!(rounds.windows(2).all(|pair| pair[0] < pair[1]));
    }
    for pair in ledgers.windows(2) {
        let common = pair[0].len().min(pair[1].len());
        assert_eq!(pair[0][..common], pair[1][..common]);
    }
}

/// Real timers over the in-process network: with the first leader cut off,
/// the remaining replicas still commit and agree.
#[tokio::test]
async fn test_partitioned_leader_is_routed_around() {
    let replicas = run_mesh(4, ReplicaId(0), None, Duration::from_millis(2000)).await;

    let ledgers: Vec<_> = replicas
        .iter()
        .map(|replica| replica.ledger().committed_rounds())
        .collect();
    assert!(ledgers[0].is_empty());
    assert_consistent_commits(&ledgers[1..]);
}

/// A follower cut off from the start misses every block. Once reconnected
/// it follows the others' certificates into later rounds without halting,
/// and commits nothing it cannot execute.
#[tokio::test]
async fn test_reconnected_replica_rejoins_current_round() {
    let replicas = run_mesh(
        4,
        ReplicaId(3),
        Some(Duration::from_millis(800)),
        Duration::from_millis(2300),
    )
    .await;

    let ledgers: Vec<_> = replicas[..3]
        .iter()
        .map(|replica| replica.ledger().committed_rounds())
        .collect();
    assert_consistent_commits(&ledgers);

    // Alone it could never leave round 0
    let healed = &replicas[3];
    assert!(healed.current_round() > 0);
    assert!(healed.ledger().committed_blocks().is_empty());
}
