//! Invocation Path Tests
//!
//! Load, component and endpoint paths: load-pending dedupe, the
//! non-blocking load path, completion callbacks, configuration errors,
//! variable handling and mutations.

use quarry_cache::StaleScope;
use quarry_core::{CachePolicy, ClientConfig, ConfigError, QuarryError, Variables};
use quarry_fetch::{
    Client, DataSource, ExecutionContext, FetchParams, FetchPhase, OperationResponse, QueryStore,
    Session,
};
use quarry_test_utils::assertions::{assert_config_error, assert_missing_context};
use quarry_test_utils::fixtures::{
    all_users_query, all_users_response, client_with, rename_user_mutation, rename_user_response,
    user_by_id_query, user_by_id_response, user_id, variables,
};
use quarry_test_utils::{init_tracing, MockTransport};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn seed(client: &Client, users: &[(&str, &str)]) {
    client
        .cache()
        .write_query(
            &all_users_query().selection,
            &all_users_response(users),
            &Variables::new(),
        )
        .expect("seed write");
}

async fn settle(store: &QueryStore) {
    while store.phase() != FetchPhase::Idle {
        tokio::task::yield_now().await;
    }
}

// ============================================================================
// LOAD-PENDING DEDUPE
// ============================================================================

#[tokio::test]
async fn test_component_fetch_during_load_is_ignored() {
    init_tracing();
    let transport = MockTransport::responding(all_users_response(&[("1", "Ada")])).gated();
    let client = client_with(&transport);
    let store = client.query_store(all_users_query());

    let load = {
        let store = store.clone();
        tokio::spawn(async move {
            store
                .fetch(
                    FetchParams::new()
                        .with_context(ExecutionContext::load())
                        .with_policy(CachePolicy::NetworkOnly),
                )
                .await
        })
    };
    transport.wait_for_calls(1).await;
    assert_eq!(store.phase(), FetchPhase::InFlight);

    let before = store.current();
    let component = store
        .fetch(
            FetchParams::new()
                .with_context(ExecutionContext::component())
                .with_policy(CachePolicy::NetworkOnly),
        )
        .await
        .unwrap();
    assert_eq!(component, before);
    assert_eq!(transport.call_count(), 1);

    transport.release(1);
    let loaded = load.await.unwrap().unwrap();
    assert_eq!(loaded.data, all_users_response(&[("1", "Ada")]));
    assert_eq!(store.phase(), FetchPhase::Idle);

    transport.release(1);
    store
        .fetch(
            FetchParams::new()
                .with_context(ExecutionContext::component())
                .with_policy(CachePolicy::NetworkOnly),
        )
        .await
        .unwrap();
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test]
async fn test_endpoint_fetch_is_not_deduplicated() {
    init_tracing();
    let transport = MockTransport::responding(all_users_response(&[("1", "Ada")]));
    let client = client_with(&transport);
    let store = client.query_store(all_users_query());
    for _ in 0..2 {
        store
            .fetch(
                FetchParams::new()
                    .with_context(ExecutionContext::endpoint())
                    .with_policy(CachePolicy::NetworkOnly),
            )
            .await
            .unwrap();
    }
    assert_eq!(transport.call_count(), 2);
}

// ============================================================================
// NON-BLOCKING LOAD PATH
// ============================================================================

#[tokio::test]
async fn test_started_load_paints_cache_then_refreshes_in_background() {
    init_tracing();
    let transport = MockTransport::responding(all_users_response(&[("1", "Ada"), ("2", "Bob")])).gated();
    let client = client_with(&transport);
    seed(&client, &[("1", "Ada")]);
    client.mark_started();
    let store = client.query_store(all_users_query());

    let immediate = store
        .fetch(
            FetchParams::new()
                .with_context(ExecutionContext::load())
                .with_policy(CachePolicy::CacheAndNetwork),
        )
        .await
        .unwrap();
    assert_eq!(immediate.data, all_users_response(&[("1", "Ada")]));
    assert_eq!(immediate.source, Some(DataSource::Cache));
    assert_eq!(store.phase(), FetchPhase::LoadPending);

    transport.wait_for_calls(1).await;
    transport.release(1);
    settle(&store).await;

    let refreshed = store.current();
    assert_eq!(refreshed.data, all_users_response(&[("1", "Ada"), ("2", "Bob")]));
    assert_eq!(refreshed.source, Some(DataSource::Network));
}

#[tokio::test]
async fn test_silent_cache_pass_does_not_echo_empty_cache() {
    init_tracing();
    let transport = MockTransport::responding(all_users_response(&[("1", "Ada")])).gated();
    let client = client_with(&transport);
    client.mark_started();
    let store = client.query_store(all_users_query());
    let mut rx = store.subscribe();

    store
        .fetch(FetchParams::new().with_context(ExecutionContext::load()))
        .await
        .unwrap();
    assert!(!rx.has_changed().unwrap());

    transport.wait_for_calls(1).await;
    transport.release(1);
    settle(&store).await;
    assert!(rx.has_changed().unwrap());
    assert_eq!(rx.borrow_and_update().data, all_users_response(&[("1", "Ada")]));
}

#[tokio::test]
async fn test_blocking_load_waits_for_network() {
    init_tracing();
    let transport = MockTransport::responding(all_users_response(&[("1", "Ada")]));
    let client = client_with(&transport);
    client.mark_started();
    let store = client.query_store(all_users_query());

    let result = store
        .fetch(
            FetchParams::new()
                .with_context(ExecutionContext::load())
                .blocking(true),
        )
        .await
        .unwrap();
    assert_eq!(result.source, Some(DataSource::Network));
    assert_eq!(store.phase(), FetchPhase::Idle);
}

#[tokio::test]
async fn test_background_failure_is_discarded() {
    init_tracing();
    let transport = MockTransport::failing("offline");
    let client = client_with(&transport);
    client.mark_started();
    let store = client.query_store(all_users_query());
    let settled = Arc::new(AtomicUsize::new(0));
    let seen = settled.clone();

    let result = store
        .fetch(
            FetchParams::new()
                .with_context(ExecutionContext::load())
                .with_policy(CachePolicy::NetworkOnly)
                .then(move |_| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
        )
        .await;
    assert!(result.is_ok());

    settle(&store).await;
    while settled.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }
    assert_eq!(store.current().errors.len(), 1);
}

// ============================================================================
// COMPLETION CALLBACK
// ============================================================================

#[tokio::test]
async fn test_failing_callback_does_not_mask_result() {
    init_tracing();
    let transport = MockTransport::responding(all_users_response(&[("1", "Ada")]));
    let client = client_with(&transport);
    let store = client.query_store(all_users_query());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let result = store
        .fetch(
            FetchParams::new()
                .with_context(ExecutionContext::component())
                .then(move |result| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(result.data, all_users_response(&[("1", "Ada")]));
                    Err("render failed".into())
                }),
        )
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(result.data, all_users_response(&[("1", "Ada")]));
}

// ============================================================================
// CONFIGURATION ERRORS
// ============================================================================

#[tokio::test]
async fn test_missing_context_fails_fast() {
    let transport = MockTransport::responding(json!({}));
    let client = client_with(&transport);
    let store = client.query_store(all_users_query());
    let result = store.fetch(FetchParams::new()).await;
    assert_missing_context(&result);
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn test_missing_transport_fails_fast() {
    let client = Client::new(ClientConfig::default()).unwrap();
    let store = client.query_store(all_users_query());
    let result = store
        .fetch(
            FetchParams::new()
                .with_context(ExecutionContext::endpoint())
                .with_policy(CachePolicy::NetworkOnly),
        )
        .await;
    assert_config_error(&result);
    assert!(matches!(
        result,
        Err(QuarryError::Config(ConfigError::TransportUnavailable { .. }))
    ));
}

#[tokio::test]
async fn test_context_transport_and_session_win() {
    let fallback = MockTransport::responding(all_users_response(&[]));
    let preferred = MockTransport::responding(all_users_response(&[("1", "Ada")]));
    let client = client_with(&fallback);
    let store = client.query_store(all_users_query());

    store
        .fetch(
            FetchParams::new()
                .with_context(
                    ExecutionContext::endpoint()
                        .with_transport(preferred.as_transport())
                        .with_session(Session::new(json!({"token": "abc"}))),
                )
                .with_policy(CachePolicy::NetworkOnly)
                .with_metadata(json!({"trace": "t-1"})),
        )
        .await
        .unwrap();

    assert_eq!(fallback.call_count(), 0);
    assert_eq!(preferred.call_count(), 1);
    assert_eq!(
        preferred.sessions()[0].as_ref().and_then(|s| s.get("token")),
        Some(&json!("abc"))
    );
    let request = preferred.last_request().unwrap();
    assert_eq!(request.metadata, json!({"trace": "t-1"}));
    assert_eq!(request.hash, all_users_query().hash);
}

// ============================================================================
// VARIABLES
// ============================================================================

#[tokio::test]
async fn test_declared_defaults_and_variable_changes() {
    init_tracing();
    let transport = MockTransport::new();
    transport.push_response(OperationResponse::data(user_by_id_response("1", "Ada")));
    transport.push_response(OperationResponse::data(user_by_id_response("2", "Bob")));
    let client = client_with(&transport);
    let store = client.query_store(user_by_id_query());
    let component = || {
        FetchParams::new()
            .with_context(ExecutionContext::component())
            .with_policy(CachePolicy::NetworkOnly)
    };

    let first = store.fetch(component()).await.unwrap();
    assert_eq!(transport.requests()[0].variables, variables(&[("id", json!("1"))]));
    assert_eq!(first.data["user"]["name"], json!("Ada"));

    let second = store
        .fetch(component().with_variables(variables(&[("id", json!("2"))])))
        .await
        .unwrap();
    assert_eq!(second.variables, variables(&[("id", json!("2"))]));
    assert_eq!(second.data["user"]["name"], json!("Bob"));

    // The observer follows the new variables only.
    client
        .cache()
        .get("User", &json!({"id": "1"}))
        .unwrap()
        .mark_stale()
        .unwrap();
    assert!(!store.current().stale);
    client
        .cache()
        .mark_stale(StaleScope::Entity(user_id("2")))
        .unwrap();
    assert!(store.current().stale);
}

// ============================================================================
// MUTATIONS AND RELEASE
// ============================================================================

#[tokio::test]
async fn test_mutation_updates_query_observers() {
    init_tracing();
    let transport = MockTransport::new();
    transport.push_response(OperationResponse::data(all_users_response(&[("1", "Ada")])));
    transport.push_response(OperationResponse::data(rename_user_response("1", "Grace")));
    let client = client_with(&transport);
    client.mark_started();
    let store = client.query_store(all_users_query());
    store
        .fetch(FetchParams::new().with_policy(CachePolicy::NetworkOnly))
        .await
        .unwrap();

    let result = client
        .mutation_store(rename_user_mutation())
        .mutate(
            Some(variables(&[("id", json!("1")), ("name", json!("Grace"))])),
            None,
        )
        .await
        .unwrap();

    assert_eq!(result.data, rename_user_response("1", "Grace"));
    assert_eq!(transport.call_count(), 2);
    assert_eq!(store.current().data, all_users_response(&[("1", "Grace")]));
}

#[tokio::test]
async fn test_mutation_transport_failure_is_in_errors() {
    let transport = MockTransport::failing("timeout");
    let client = client_with(&transport);
    let result = client
        .mutation_store(rename_user_mutation())
        .mutate(None, Some(ExecutionContext::endpoint()))
        .await
        .unwrap();
    assert_eq!(result.errors.len(), 1);
    assert!(result.data.is_null());
}

#[tokio::test]
async fn test_list_operations_reach_query_store() {
    init_tracing();
    let transport = MockTransport::responding(all_users_response(&[("1", "Ada")]));
    let client = client_with(&transport);
    client.mark_started();
    let store = client.query_store(all_users_query());
    store.fetch(FetchParams::new()).await.unwrap();

    let cache = client.cache();
    cache
        .get("User", &json!({"id": "2"}))
        .unwrap()
        .write(
            &quarry_test_utils::fixtures::user_selection(),
            &quarry_test_utils::fixtures::user_json("2", "Bob"),
            &Variables::new(),
        )
        .unwrap();
    cache.list("All_Users").prepend(&user_id("2")).unwrap();

    assert_eq!(
        store.current().data,
        all_users_response(&[("2", "Bob"), ("1", "Ada")])
    );
}

#[tokio::test]
async fn test_release_drops_observer() {
    let transport = MockTransport::responding(all_users_response(&[("1", "Ada")]));
    let client = client_with(&transport);
    client.mark_started();
    let store = client.query_store(all_users_query());
    store.fetch(FetchParams::new()).await.unwrap();
    assert_eq!(client.cache().observer_count().unwrap(), 1);
    store.release().unwrap();
    assert_eq!(client.cache().observer_count().unwrap(), 0);
    assert_eq!(client.cache().refcount(&user_id("1")).unwrap(), 0);
}
