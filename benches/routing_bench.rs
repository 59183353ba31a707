use criterion::{black_box, criterion_group, criterion_main, Criterion};
use relaygate::registry::{Capability, Registry};
use relaygate::types::{ChatRequest, GenerationOptions, Message};

fn bench_registry_resolve(c: &mut Criterion) {
    let mut registry = Registry::new(Capability::Llm);
    for key in ["openai", "azure", "gemini", "openai-eu", "gemini-flash"] {
        registry.register(key, key.len()).unwrap();
    }

    c.bench_function("resolve_first", |b| {
        b.iter(|| registry.resolve(black_box("openai")))
    });

    c.bench_function("resolve_last", |b| {
        b.iter(|| registry.resolve(black_box("gemini-flash")))
    });

    c.bench_function("resolve_not_configured", |b| {
        b.iter(|| registry.resolve(black_box("mistral")))
    });
}

fn bench_request_validation(c: &mut Criterion) {
    let request = ChatRequest {
        provider: "openai".to_string(),
        messages: vec![
            Message::system("You are a helpful assistant"),
            Message::user("Hello!"),
            Message::assistant("Hi! How can I help?"),
            Message::user("Tell me a joke."),
        ],
        model: Some("gpt-4o".to_string()),
        temperature: Some(0.7),
        max_tokens: Some(256),
        user_id: "bench".to_string(),
        save_to_db: false,
        db_type: None,
    };

    c.bench_function("validate_chat_request", |b| {
        b.iter(|| black_box(&request).validate())
    });

    let opts = GenerationOptions::default();
    c.bench_function("effective_model", |b| {
        b.iter(|| black_box(&opts).model_or("gpt-3.5-turbo").len())
    });
}

fn bench_serialization(c: &mut Criterion) {
    let request_json = r#"{
        "provider": "gemini",
        "messages": [
            {"role": "system", "content": "You are a helpful assistant"},
            {"role": "user", "content": "Hello!"}
        ],
        "temperature": 0.2,
        "save_to_db": true,
        "db_type": "postgres"
    }"#;

    c.bench_function("deserialize_chat_request", |b| {
        b.iter(|| serde_json::from_str::<ChatRequest>(black_box(request_json)))
    });

    let request: ChatRequest = serde_json::from_str(request_json).unwrap();
    c.bench_function("serialize_chat_request", |b| {
        b.iter(|| serde_json::to_string(black_box(&request)))
    });
}

criterion_group!(
    benches,
    bench_registry_resolve,
    bench_request_validation,
    bench_serialization
);
criterion_main!(benches);
