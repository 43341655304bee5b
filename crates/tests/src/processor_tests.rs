//! End-to-end tests of the specialised request processors.
//!
//! These tests verify:
//! - Sticky resources route back to the upstream that created them
//! - Integrity checks replace lagging head answers and feed observed heights back
//! - Subscriptions relay upstream events until unsubscribed and fail over on open errors

use crate::mock_infrastructure::{block, gateway, request, wait_until, MockReply, EVM_METHODS};
use gateway_core::{
    chain::{upstream_index_for, UpstreamState, UpstreamStatus},
    config::ChainConfig,
    flow::FlowResponse,
};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn polygon() -> ChainConfig {
    ChainConfig::new("polygon", 137)
}

async fn next(receiver: &mut mpsc::UnboundedReceiver<FlowResponse>) -> Option<FlowResponse> {
    tokio::time::timeout(Duration::from_secs(2), receiver.recv()).await.expect("flow answered in time")
}

#[tokio::test]
async fn test_filter_requests_stick_to_creating_upstream() {
    let fixture = gateway(polygon(), &[("a", 100), ("b", 100), ("c", 100)]).await;
    for id in ["a", "b", "c"] {
        fixture.upstream(id).respond("eth_newFilter", MockReply::result(json!("0x1f")));
        fixture.upstream(id).respond("eth_getFilterChanges", MockReply::result(json!([])));
    }

    let created = fixture.call(request("eth_newFilter", json!([{ "address": "0xabc" }]))).await;
    let owner = created.upstream_id.expect("served by an upstream").to_string();
    let filter = created.response.result.as_ref().and_then(Value::as_str).expect("filter id").to_string();
    assert_eq!(filter, format!("0x1f{}", upstream_index_for(&owner)));

    // rotation would move off the owner if the index were ignored
    for _ in 0..4 {
        let changes = fixture.call(request("eth_getFilterChanges", json!([filter]))).await;
        assert_eq!(changes.upstream_id.as_deref(), Some(owner.as_str()));
        assert_eq!(changes.response.result, Some(json!([])));
    }

    let forwarded = fixture.upstream(&owner).calls();
    let last = forwarded.last().expect("owner saw the filter calls");
    assert_eq!(last.request.method, "eth_getFilterChanges");
    assert_eq!(last.request.param(0), Some(&json!("0x1f")), "the upstream sees its own filter id");
    assert_eq!(fixture.upstream(&owner).calls_for("eth_getFilterChanges"), 4);
    fixture.shutdown().await;
}

#[tokio::test]
async fn test_filter_id_without_index_is_rejected() {
    let fixture = gateway(polygon(), &[("a", 100)]).await;

    let response = fixture.call(request("eth_uninstallFilter", json!(["0x1"]))).await;

    assert_eq!(response.response.error.map(|e| e.code), Some(-32600));
    assert_eq!(fixture.upstream("a").call_count(), 0);
    fixture.shutdown().await;
}

#[tokio::test]
async fn test_integrity_replaces_lagging_head() {
    let mut chain = polygon();
    chain.integrity = true;
    let fixture = gateway(chain, &[("a", 100), ("b", 100), ("c", 120)]).await;
    fixture.upstream("a").respond("eth_blockNumber", MockReply::result(json!("0x64")));
    fixture.upstream("b").respond("eth_blockNumber", MockReply::result(json!("0x64")));
    fixture.upstream("c").respond("eth_blockNumber", MockReply::result(json!("0x78")));

    // whichever upstream answers first, the client never sees a block behind 120
    for _ in 0..3 {
        let response = fixture.call(request("eth_blockNumber", json!([]))).await;
        assert_eq!(response.response.result, Some(json!("0x78")));
        assert_eq!(response.upstream_id.as_deref(), Some("c"));
        assert_eq!(*response.id, json!(1));
    }
    fixture.shutdown().await;
}

#[tokio::test]
async fn test_integrity_feeds_observed_head_back() {
    let mut chain = polygon();
    chain.integrity = true;
    let fixture = gateway(chain, &[("a", 100)]).await;
    fixture.upstream("a").respond("eth_getBlockByNumber", MockReply::result(block(0x70)));

    let response = fixture.call(request("eth_getBlockByNumber", json!(["latest", false]))).await;
    assert_eq!(response.upstream_id.as_deref(), Some("a"));

    let supervisor = fixture.supervisor();
    wait_until("observed head", || supervisor.chain_state().head.height == 0x70).await;
    assert_eq!(supervisor.chain_state().head.owner.as_deref(), Some("a"));
    fixture.shutdown().await;
}

#[tokio::test]
async fn test_integrity_disabled_keeps_lagging_answer() {
    let fixture = gateway(polygon(), &[("a", 100), ("c", 120)]).await;
    fixture.upstream("a").respond("eth_blockNumber", MockReply::result(json!("0x64")));
    fixture.upstream("c").respond("eth_blockNumber", MockReply::result(json!("0x78")));

    let mut seen = Vec::new();
    for _ in 0..2 {
        let response = fixture.call(request("eth_blockNumber", json!([]))).await;
        seen.push(response.response.result.expect("result"));
    }
    seen.sort_by_key(ToString::to_string);
    assert_eq!(seen, [json!("0x64"), json!("0x78")], "plain requests rotate without head checks");
    fixture.shutdown().await;
}

#[tokio::test]
async fn test_subscription_relays_until_unsubscribed() {
    let fixture = gateway(polygon(), &[("a", 100)]).await;
    fixture.upstream("a").subscription("0xsub", vec![block(101), block(102)], true);

    let cancel = CancellationToken::new();
    let mut receiver =
        fixture.runtime.flow().execute(&fixture.chain, vec![request("eth_subscribe", json!(["newHeads"]))], &cancel);

    let opened = next(&mut receiver).await.expect("subscription id");
    assert_eq!(opened.response.result, Some(json!("0xsub")));
    assert_eq!(opened.upstream_id.as_deref(), Some("a"));

    for number in ["0x65", "0x66"] {
        let event = next(&mut receiver).await.expect("notification");
        let result = event.response.result.expect("notification body");
        assert_eq!(result["subscription"], json!("0xsub"));
        assert_eq!(result["result"]["number"], json!(number));
        assert_eq!(*event.id, json!(1));
    }
    assert_eq!(fixture.runtime.components().subscriptions().len(), 1);

    let unsubscribed = fixture.call(request("eth_unsubscribe", json!(["0xsub"]))).await;
    assert_eq!(unsubscribed.response.result, Some(json!(true)));
    assert!(next(&mut receiver).await.is_none(), "the relay ends after unsubscribe");
    assert!(fixture.runtime.components().subscriptions().is_empty());

    let again = fixture.call(request("eth_unsubscribe", json!(["0xsub"]))).await;
    assert_eq!(again.response.result, Some(json!(false)));
    assert_eq!(fixture.runtime.components().stats().snapshot().subscriptions, 1);
    fixture.shutdown().await;
}

#[tokio::test]
async fn test_client_cancel_closes_subscription() {
    let fixture = gateway(polygon(), &[("a", 100)]).await;
    fixture.upstream("a").subscription("0xsub", vec![], true);

    let cancel = CancellationToken::new();
    let mut receiver =
        fixture.runtime.flow().execute(&fixture.chain, vec![request("eth_subscribe", json!(["newHeads"]))], &cancel);
    assert!(next(&mut receiver).await.is_some());

    cancel.cancel();
    assert!(next(&mut receiver).await.is_none());
    let subscriptions = std::sync::Arc::clone(fixture.runtime.components().subscriptions());
    wait_until("registry cleared", || subscriptions.is_empty()).await;
    fixture.shutdown().await;
}

#[tokio::test]
async fn test_subscription_fails_over_to_next_upstream() {
    let fixture = gateway(polygon(), &[("a", 100), ("b", 100)]).await;
    // "a" has no scripted subscription and rejects the open
    fixture.upstream("b").subscription("0xb", vec![block(101)], false);

    let responses = fixture.send(vec![request("eth_subscribe", json!(["newHeads"]))]).await;

    assert_eq!(responses[0].response.result, Some(json!("0xb")));
    assert!(responses.iter().all(|r| r.upstream_id.as_deref() == Some("b")));
    assert_eq!(responses.len(), 2, "id then one event, then the upstream closed");
    assert!(fixture.upstream("a").call_count() <= 1);
    fixture.shutdown().await;
}

#[tokio::test]
async fn test_subscription_needs_websocket_upstream() {
    let fixture = gateway(polygon(), &[("a", 100), ("b", 100)]).await;
    // both stay available but lose their websocket capability
    for id in ["a", "b"] {
        let http_only = UpstreamState::new(id, UpstreamStatus::Available)
            .with_head(100)
            .with_methods(EVM_METHODS.iter().copied());
        fixture.publish(id, http_only).await;
        fixture.upstream(id).subscription("0xsub", vec![], false);
    }
    let supervisor = fixture.supervisor();
    wait_until("no ws upstream", || {
        ["a", "b"].iter().all(|id| supervisor.upstream_state(id).is_some_and(|s| s.caps.is_empty()))
    })
    .await;

    let responses = fixture.send(vec![request("eth_subscribe", json!(["newHeads"]))]).await;

    let error = responses[0].response.error.as_ref().expect("no ws upstream left");
    assert_eq!(error.code, 1);
    assert!(responses[0].upstream_id.is_none());
    assert_eq!(fixture.upstream("a").call_count() + fixture.upstream("b").call_count(), 0);
    fixture.shutdown().await;
}
