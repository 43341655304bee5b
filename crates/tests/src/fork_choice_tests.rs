//! Integration tests for chain supervision.
//!
//! These tests drive a [`ChainRegistry`] the way upstreams do, by publishing state
//! snapshots, and check the merged chain view:
//! - The head is the maximum over available upstreams only
//! - Losing the head owner lowers the head to the best remaining report
//! - Block markers only rise while their owner stays available
//! - Chain status is the best status of any upstream

use crate::mock_infrastructure::{available, wait_until};
use gateway_core::chain::{
    BlockData, BlockType, ChainRegistry, ObservedBlock, SupervisorConfig, UpstreamEvent, UpstreamState,
    UpstreamStatus,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn registry() -> (ChainRegistry, CancellationToken) {
    let shutdown = CancellationToken::new();
    (ChainRegistry::new(SupervisorConfig::default(), shutdown.clone()), shutdown)
}

#[tokio::test]
async fn test_head_ignores_unavailable_upstream() {
    let (registry, shutdown) = registry();
    let supervisor = registry.add_chain("polygon");

    supervisor.publish(UpstreamEvent::state_update("a", available("a", 100))).await.unwrap();
    supervisor.publish(UpstreamEvent::state_update("b", available("b", 95))).await.unwrap();
    supervisor
        .publish(UpstreamEvent::state_update(
            "c",
            available("c", 500).with_status(UpstreamStatus::Unavailable),
        ))
        .await
        .unwrap();

    wait_until("three upstreams", || supervisor.upstream_ids().len() == 3).await;
    wait_until("head", || supervisor.chain_state().head.height == 100).await;

    let state = supervisor.chain_state();
    assert_eq!(state.head.height, 100, "the unavailable upstream at 500 must not win");
    assert_eq!(state.head.owner.as_deref(), Some("a"));
    assert_eq!(state.status, UpstreamStatus::Available);
    shutdown.cancel();
}

#[tokio::test]
async fn test_head_follows_recovery_and_loss_of_leader() {
    let (registry, shutdown) = registry();
    let supervisor = registry.add_chain("polygon");

    supervisor.publish(UpstreamEvent::state_update("a", available("a", 100))).await.unwrap();
    supervisor.publish(UpstreamEvent::state_update("b", available("b", 95))).await.unwrap();
    wait_until("head 100", || supervisor.chain_state().head.height == 100).await;

    // the upstream at 500 comes back
    supervisor.publish(UpstreamEvent::state_update("c", available("c", 500))).await.unwrap();
    wait_until("head 500", || supervisor.chain_state().head.height == 500).await;
    assert_eq!(supervisor.chain_state().head.owner.as_deref(), Some("c"));

    // and goes away again: the head drops to the best remaining report
    supervisor.publish(UpstreamEvent::remove("c")).await.unwrap();
    wait_until("head back to 100", || supervisor.chain_state().head.height == 100).await;

    supervisor.publish(UpstreamEvent::remove("a")).await.unwrap();
    wait_until("head 95", || supervisor.chain_state().head.height == 95).await;
    assert_eq!(supervisor.chain_state().head.owner.as_deref(), Some("b"));
    shutdown.cancel();
}

#[tokio::test]
async fn test_status_and_methods_merge() {
    let (registry, shutdown) = registry();
    let supervisor = registry.add_chain("polygon");

    let down = UpstreamState::new("a", UpstreamStatus::Unavailable).with_head(10).with_methods(["debug_traceTransaction"]);
    supervisor.publish(UpstreamEvent::state_update("a", down)).await.unwrap();
    wait_until("first upstream", || supervisor.upstream_ids().len() == 1).await;
    wait_until("snapshot", || supervisor.chain_state().status == UpstreamStatus::Unavailable).await;
    assert!(supervisor.chain_state().methods.is_empty(), "methods of unavailable upstreams are not served");

    let up = UpstreamState::new("b", UpstreamStatus::Available).with_head(10).with_methods(["eth_call"]);
    supervisor.publish(UpstreamEvent::state_update("b", up)).await.unwrap();
    wait_until("chain available", || supervisor.chain_state().status == UpstreamStatus::Available).await;

    let state = supervisor.chain_state();
    assert!(state.methods.contains("eth_call"));
    assert!(!state.methods.contains("debug_traceTransaction"));
    shutdown.cancel();
}

#[tokio::test]
async fn test_finalized_marker_is_monotonic_while_owner_available() {
    let (registry, shutdown) = registry();
    let supervisor = registry.add_chain("polygon");

    let a = |finalized: u64| available("a", 200).with_block(BlockData::new(finalized, BlockType::Finalized));
    supervisor.publish(UpstreamEvent::state_update("a", a(150))).await.unwrap();
    wait_until("finalized 150", || supervisor.chain_state().block_height(BlockType::Finalized) == Some(150)).await;

    supervisor.publish(UpstreamEvent::state_update("a", a(140))).await.unwrap();
    supervisor.publish(UpstreamEvent::state_update("b", available("b", 190))).await.unwrap();
    wait_until("second upstream", || supervisor.upstream_ids().len() == 2).await;
    wait_until("snapshot after b", || supervisor.chain_state().head.height == 200).await;
    assert_eq!(supervisor.chain_state().block_height(BlockType::Finalized), Some(150));

    supervisor.publish(UpstreamEvent::state_update("a", a(160))).await.unwrap();
    wait_until("finalized 160", || supervisor.chain_state().block_height(BlockType::Finalized) == Some(160)).await;
    shutdown.cancel();
}

#[tokio::test]
async fn test_observed_blocks_raise_markers() {
    let (registry, shutdown) = registry();
    let supervisor = registry.add_chain("polygon");
    supervisor.publish(UpstreamEvent::state_update("a", available("a", 100))).await.unwrap();
    wait_until("head", || supervisor.chain_state().head.height == 100).await;

    supervisor.observe(Arc::from("a"), ObservedBlock::Head(90)).await.unwrap();
    supervisor.observe(Arc::from("a"), ObservedBlock::Head(130)).await.unwrap();
    wait_until("observed head", || supervisor.chain_state().head.height == 130).await;

    supervisor
        .observe(Arc::from("a"), ObservedBlock::Block(BlockData::new(120, BlockType::Safe)))
        .await
        .unwrap();
    wait_until("safe marker", || supervisor.chain_state().block_height(BlockType::Safe) == Some(120)).await;

    // observations from unknown upstreams are dropped
    supervisor.observe(Arc::from("ghost"), ObservedBlock::Head(1_000)).await.unwrap();
    supervisor.observe(Arc::from("a"), ObservedBlock::Head(131)).await.unwrap();
    wait_until("later observation applied", || supervisor.chain_state().head.height == 131).await;
    shutdown.cancel();
}

#[tokio::test]
async fn test_registry_isolates_chains() {
    let (registry, shutdown) = registry();
    let polygon = registry.add_chain("polygon");
    let ethereum = registry.add_chain("ethereum");
    assert!(Arc::ptr_eq(&polygon, &registry.add_chain("polygon")));

    polygon.publish(UpstreamEvent::state_update("a", available("a", 100))).await.unwrap();
    wait_until("polygon head", || polygon.chain_state().head.height == 100).await;

    assert_eq!(ethereum.chain_state().head.height, 0);
    assert!(ethereum.upstream_ids().is_empty());
    let chains: Vec<String> = registry.chains().iter().map(ToString::to_string).collect();
    assert_eq!(chains, ["ethereum", "polygon"]);
    shutdown.cancel();
}

#[tokio::test]
async fn test_shutdown_stops_supervisors() {
    let (registry, shutdown) = registry();
    let supervisor = registry.add_chain("polygon");
    shutdown.cancel();

    wait_until("supervisor stopped", || !supervisor.try_publish(UpstreamEvent::remove("a"))).await;
}
