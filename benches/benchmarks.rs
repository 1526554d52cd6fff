use std::sync::Arc;

use ai_gateway_core::repository::InMemoryProviderRepository;
use ai_gateway_core::{
    Capability, Dialect, GatewayConfig, GatewayCore, InvokeRequest, Message, NewProvider, RoutingPreferences,
    RoutingStrategy,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_gateway_creation(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("gateway_creation", |b| {
        b.iter(|| {
            let repository = Arc::new(InMemoryProviderRepository::new());
            let mut gateway = GatewayCore::new(GatewayConfig::default(), repository).unwrap();
            rt.block_on(gateway.shutdown());
        });
    });
}

fn bench_provider_registration(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let repository = Arc::new(InMemoryProviderRepository::new());
    let mut gateway = GatewayCore::new(GatewayConfig::default(), repository).unwrap();

    c.bench_function("provider_registration", |b| {
        b.iter(|| {
            rt.block_on(gateway.create_provider(NewProvider {
                tenant_id: "tenant-1".to_string(),
                owner_user_id: "user-1".to_string(),
                display_name: "bench-provider".to_string(),
                dialect: Dialect::VendorA,
                base_url: Some("https://example.invalid".to_string()),
                credential: "sk-test".to_string(),
                config_json: "{}".to_string(),
                capabilities: std::collections::HashSet::from([Capability::Chat]),
                priority: 50,
                rate_limit_per_minute: None,
                cost_per_token: None,
            }))
            .unwrap();
        });
    });

    rt.block_on(gateway.shutdown());
}

fn bench_request_creation(c: &mut Criterion) {
    c.bench_function("invoke_request_creation", |b| {
        b.iter(|| {
            let mut request = InvokeRequest::new(vec![
                Message::system("You are a helpful assistant."),
                Message::user("Hello, how are you?"),
            ]);
            request.temperature = Some(0.7);
            request.max_tokens = Some(100);
            request.stream = Some(false);
            let _ = black_box(request);
        });
    });
}

fn bench_message_creation(c: &mut Criterion) {
    c.bench_function("message_creation", |b| {
        b.iter(|| {
            let _user_msg = Message::user("Hello, world!");
            let _assistant_msg = Message::assistant("Hi there!");
            let _system_msg = Message::system("You are a helpful assistant.");
        });
    });
}

fn bench_routing_preferences_creation(c: &mut Criterion) {
    c.bench_function("routing_preferences_creation", |b| {
        b.iter(|| {
            let _cost = RoutingPreferences {
                strategy: Some(RoutingStrategy::Cost),
                ..Default::default()
            };
            let _latency = RoutingPreferences {
                strategy: Some(RoutingStrategy::Latency),
                ..Default::default()
            };
            let _quality = RoutingPreferences {
                strategy: Some(RoutingStrategy::Quality),
                ..Default::default()
            };
            let _balanced = RoutingPreferences {
                strategy: Some(RoutingStrategy::Balanced),
                require_capabilities: vec![Capability::FunctionCalling],
                ..Default::default()
            };
        });
    });
}

fn bench_serialization(c: &mut Criterion) {
    let mut request = InvokeRequest::new(vec![
        Message::system("You are a helpful assistant."),
        Message::user("Hello, how are you?"),
    ]);
    request.temperature = Some(0.7);
    request.max_tokens = Some(100);
    request.stream = Some(false);

    c.bench_function("request_serialization", |b| {
        b.iter(|| {
            let _json = serde_json::to_string(black_box(&request));
        });
    });

    c.bench_function("request_deserialization", |b| {
        let json = serde_json::to_string(&request).unwrap();
        b.iter(|| {
            let _request: InvokeRequest = serde_json::from_str(black_box(&json)).unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_gateway_creation,
    bench_provider_registration,
    bench_request_creation,
    bench_message_creation,
    bench_routing_preferences_creation,
    bench_serialization
);
criterion_main!(benches);
