//! End-to-end scenarios wired against mocked upstream HTTP servers, covering
//! the six literal-input walkthroughs: happy path, fallback on 5xx, breaker
//! opening, capability filtering, the cost cap, and total failure. The
//! quantified invariants (T1-T8) are covered at the unit level alongside the
//! component they name (`registry.rs`, `circuit_breaker.rs`, `rate_limiter.rs`,
//! `routing.rs`, `vault.rs`, `metrics.rs`); these tests exercise the wiring
//! between components that no single module's test suite can see.

use std::collections::HashSet;
use std::sync::Arc;

use ai_gateway_core::events::GatewayEvent;
use ai_gateway_core::repository::InMemoryProviderRepository;
use ai_gateway_core::{
    Capability, Dialect, GatewayConfig, GatewayCore, GatewayError, InvokeRequest, Message, NewProvider, Tool,
    RoutingPreferences, RoutingStrategy,
};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn gateway() -> GatewayCore {
    let repository = Arc::new(InMemoryProviderRepository::new());
    GatewayCore::new(GatewayConfig::default(), repository).unwrap()
}

fn provider(
    tenant_id: &str,
    base_url: &str,
    priority: u8,
    cost_per_token: Option<f64>,
    capabilities: HashSet<Capability>,
) -> NewProvider {
    NewProvider {
        tenant_id: tenant_id.to_string(),
        owner_user_id: "user-1".to_string(),
        display_name: base_url.to_string(),
        dialect: Dialect::VendorA,
        base_url: Some(base_url.to_string()),
        credential: "sk-test".to_string(),
        config_json: "{}".to_string(),
        capabilities,
        priority,
        rate_limit_per_minute: None,
        cost_per_token,
    }
}

fn success_body(model: &str, total_tokens: u32) -> serde_json::Value {
    json!({
        "choices": [{"message": {"content": "hello there"}}],
        "model": model,
        "usage": {
            "prompt_tokens": total_tokens / 2,
            "completion_tokens": total_tokens - total_tokens / 2,
            "total_tokens": total_tokens,
        },
    })
}

fn error_body(message: &str) -> serde_json::Value {
    json!({ "error": { "message": message } })
}

/// Scenario 1: two healthy providers, balanced strategy, higher priority wins.
#[tokio::test]
async fn scenario_happy_path_picks_the_higher_priority_provider_first() {
    let p1 = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(success_body("vendor-a-model", 20)))
        .mount(&p1)
        .await;

    let p2 = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(success_body("vendor-b-model", 20)))
        .mount(&p2)
        .await;

    let mut gw = gateway().await;
    gw.create_provider(provider("t1", &p1.uri(), 80, Some(1e-4), HashSet::from([Capability::Chat])))
        .await
        .unwrap();
    gw.create_provider(provider("t1", &p2.uri(), 50, Some(5e-4), HashSet::from([Capability::Chat])))
        .await
        .unwrap();

    let mut request = InvokeRequest::new(vec![Message::user("hi")]);
    request.max_tokens = Some(16);
    let prefs = RoutingPreferences {
        strategy: Some(RoutingStrategy::Balanced),
        ..Default::default()
    };

    let result = gw.execute("t1", request, Some(prefs)).await.unwrap();

    assert_eq!(result.attempts, 1);
    assert!(!result.fallback_used);
    assert_eq!(result.result.model, "vendor-a-model");

    gw.shutdown().await;
}

/// Scenario 2: P1 fails with a retryable 5xx and is exhausted, P2 succeeds.
/// `attempts` counts candidates tried (§4.8 step 1), not internal retries, so
/// it lands at 2 here even though P1 itself absorbed several internal retries
/// before falling through.
#[tokio::test]
async fn scenario_fallback_on_5xx_falls_through_to_the_next_candidate() {
    let p1 = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_json(error_body("upstream overloaded")))
        .mount(&p1)
        .await;

    let p2 = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(success_body("vendor-b-model", 20)))
        .mount(&p2)
        .await;

    let mut gw = gateway().await;
    gw.create_provider(provider("t1", &p1.uri(), 80, Some(1e-4), HashSet::from([Capability::Chat])))
        .await
        .unwrap();
    gw.create_provider(provider("t1", &p2.uri(), 50, Some(5e-4), HashSet::from([Capability::Chat])))
        .await
        .unwrap();

    let request = InvokeRequest::new(vec![Message::user("hi")]);
    let result = gw.execute("t1", request, None).await.unwrap();

    assert_eq!(result.attempts, 2);
    assert!(result.fallback_used);
    assert_eq!(result.result.model, "vendor-b-model");

    gw.shutdown().await;
}

/// Scenario 3: five consecutive non-retryable failures open the breaker; the
/// sixth call is denied locally without ever reaching the mock server.
#[tokio::test]
async fn scenario_breaker_opens_after_five_failures_and_denies_the_sixth_call() {
    let p1 = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(error_body("invalid api key")))
        .mount(&p1)
        .await;

    let mut gw = gateway().await;
    gw.create_provider(provider("t1", &p1.uri(), 50, None, HashSet::from([Capability::Chat])))
        .await
        .unwrap();

    let no_fallback = || RoutingPreferences {
        enable_fallback: Some(false),
        ..Default::default()
    };

    for _ in 0..5 {
        let request = InvokeRequest::new(vec![Message::user("hi")]);
        let err = gw.execute("t1", request, Some(no_fallback())).await.unwrap_err();
        assert!(matches!(err, GatewayError::AllProvidersFailed { .. }));
    }

    let request = InvokeRequest::new(vec![Message::user("hi")]);
    let err = gw.execute("t1", request, Some(no_fallback())).await.unwrap_err();
    match err {
        GatewayError::AllProvidersFailed { last_error_kind, attempts } => {
            assert_eq!(last_error_kind, "CircuitOpen");
            assert_eq!(attempts, 1);
        }
        other => panic!("expected AllProvidersFailed, got {other:?}"),
    }

    assert_eq!(p1.received_requests().await.unwrap().len(), 5);

    gw.shutdown().await;
}

/// Scenario 4: the caller requires `function_calling`; only P2 advertises it.
#[tokio::test]
async fn scenario_capability_filter_excludes_providers_missing_a_required_capability() {
    let p1 = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(success_body("vendor-a-model", 20)))
        .mount(&p1)
        .await;

    let p2 = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(success_body("vendor-b-model", 20)))
        .mount(&p2)
        .await;

    let mut gw = gateway().await;
    gw.create_provider(provider("t1", &p1.uri(), 90, Some(1e-4), HashSet::from([Capability::Chat])))
        .await
        .unwrap();
    gw.create_provider(
        provider(
            "t1",
            &p2.uri(),
            50,
            Some(1e-4),
            HashSet::from([Capability::Chat, Capability::FunctionCalling]),
        ),
    )
    .await
    .unwrap();

    let mut request = InvokeRequest::new(vec![Message::user("what's the weather?")]);
    request.tools = Some(vec![Tool(json!({"name": "get_weather"}))]);
    let prefs = RoutingPreferences {
        require_capabilities: vec![Capability::FunctionCalling],
        has_tools: true,
        ..Default::default()
    };

    let result = gw.execute("t1", request, Some(prefs)).await.unwrap();
    assert_eq!(result.result.model, "vendor-b-model");

    gw.shutdown().await;
}

/// Scenario 5: P1 is over the caller's cost cap and is filtered out; P2's
/// estimated cost is `cost_per_token * reported total_tokens`.
#[tokio::test]
async fn scenario_cost_cap_filters_out_the_expensive_provider() {
    let p1 = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(success_body("vendor-a-model", 20)))
        .mount(&p1)
        .await;

    let p2 = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(success_body("vendor-b-model", 40)))
        .mount(&p2)
        .await;

    let mut gw = gateway().await;
    gw.create_provider(provider("t1", &p1.uri(), 50, Some(2e-3), HashSet::from([Capability::Chat])))
        .await
        .unwrap();
    gw.create_provider(provider("t1", &p2.uri(), 50, Some(5e-4), HashSet::from([Capability::Chat])))
        .await
        .unwrap();

    let request = InvokeRequest::new(vec![Message::user("hi")]);
    let prefs = RoutingPreferences {
        strategy: Some(RoutingStrategy::Cost),
        max_cost_per_token: Some(1e-3),
        ..Default::default()
    };

    let result = gw.execute("t1", request, Some(prefs)).await.unwrap();
    assert_eq!(result.result.model, "vendor-b-model");
    assert_eq!(result.tokens_used, 40);
    assert!((result.estimated_cost - 5e-4 * 40.0).abs() < 1e-12);

    gw.shutdown().await;
}

/// Scenario 6: both candidates fail with non-retryable errors; no internal
/// retries happen and the terminal error reports every candidate tried.
#[tokio::test]
async fn scenario_all_providers_failing_reports_terminal_error_with_every_attempt_counted() {
    let p1 = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(error_body("invalid api key")))
        .mount(&p1)
        .await;

    let p2 = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_json(error_body("malformed request")))
        .mount(&p2)
        .await;

    let mut gw = gateway().await;
    gw.create_provider(provider("t1", &p1.uri(), 80, None, HashSet::from([Capability::Chat])))
        .await
        .unwrap();
    gw.create_provider(provider("t1", &p2.uri(), 50, None, HashSet::from([Capability::Chat])))
        .await
        .unwrap();

    let mut events = gw.subscribe_events();

    let request = InvokeRequest::new(vec![Message::user("hi")]);
    let err = gw.execute("t1", request, None).await.unwrap_err();

    match err {
        GatewayError::AllProvidersFailed { last_error_kind, attempts } => {
            assert_eq!(attempts, 2);
            assert_eq!(last_error_kind, "Upstream4xxValidation");
        }
        other => panic!("expected AllProvidersFailed, got {other:?}"),
    }

    assert_eq!(p1.received_requests().await.unwrap().len(), 1);
    assert_eq!(p2.received_requests().await.unwrap().len(), 1);

    let mut failed = 0;
    let mut terminal = 0;
    while let Ok(timestamped) = events.try_recv() {
        match timestamped.event {
            GatewayEvent::ExecutionFailed { .. } => failed += 1,
            GatewayEvent::AllProvidersFailed { attempts, .. } => {
                terminal += 1;
                assert_eq!(attempts, 2);
            }
            _ => {}
        }
    }
    assert_eq!(failed, 2, "expected one ExecutionFailed event per candidate tried");
    assert_eq!(terminal, 1, "expected exactly one terminal AllProvidersFailed event");

    gw.shutdown().await;
}
