//! Request/response capture and the resulting audit entries.

mod common;

use audit_proxy::config::RouteConfig;
use audit_proxy::observability::StreamFilter;
use serde_json::{json, Value};

fn capturing_route(target: String) -> RouteConfig {
    let mut route = RouteConfig::new(target);
    route.log_request_headers = Some(true);
    route.log_request_body = Some(true);
    route.log_response_headers = Some(true);
    route.log_response_body = Some(true);
    route
}

#[tokio::test]
async fn captures_bodies_and_masks_headers() {
    let backend = common::start_echo_backend().await;
    let proxy = common::start_proxy(common::config_with(&[(
        "api.local",
        capturing_route(format!("http://{backend}")),
    )]))
    .await;

    let response = common::client()
        .post(proxy.url("/users"))
        .header("host", "api.local")
        .header("authorization", "Bearer secret-token-123456")
        .json(&json!({ "name": "ada" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let trace_id = response.headers()["x-trace-id"].to_str().unwrap().to_string();
    let echoed: Value = response.json().await.unwrap();

    // The upstream sees the original body and credentials.
    assert_eq!(echoed["body"], r#"{"name":"ada"}"#);
    assert_eq!(echoed["headers"]["authorization"], "Bearer secret-token-123456");

    let traces = proxy.state.traces.clone();
    let id = trace_id.clone();
    assert!(
        common::eventually(|| traces.get(&id).map(|t| t.is_finished()).unwrap_or(false)).await
    );

    let trace = traces.get(&trace_id).unwrap();
    assert_eq!(trace.method, "POST");
    assert_eq!(trace.url, "/users");
    assert_eq!(trace.status_code, Some(200));
    assert_eq!(trace.request_body, Some(json!({ "name": "ada" })));
    assert_eq!(trace.response_body.as_ref().unwrap()["method"], "POST");
    assert_ne!(
        trace.request_headers.get("authorization").map(String::as_str),
        Some("Bearer secret-token-123456")
    );

    let entries = proxy.state.logger.history(&StreamFilter::default());
    let mine: Vec<_> = entries.iter().filter(|e| e.trace_id == trace_id).collect();
    let messages: Vec<&str> = mine.iter().map(|e| e.message.as_str()).collect();
    assert!(messages[0].starts_with("POST /users -> "));
    assert!(messages.contains(&"Request headers"));
    assert!(messages.contains(&"Request body"));
    assert!(messages.contains(&"Response headers"));
    assert!(messages.contains(&"Response body"));

    let request_body = mine.iter().find(|e| e.message == "Request body").unwrap();
    assert_eq!(request_body.data, Some(json!({ "name": "ada" })));

    proxy.stop();
}

#[tokio::test]
async fn capture_flags_default_to_off() {
    let backend = common::start_echo_backend().await;
    let proxy = common::start_proxy(common::config_with(&[(
        "api.local",
        RouteConfig::new(format!("http://{backend}")),
    )]))
    .await;

    let response = common::client()
        .post(proxy.url("/users"))
        .header("host", "api.local")
        .body("plain text")
        .send()
        .await
        .unwrap();
    let trace_id = response.headers()["x-trace-id"].to_str().unwrap().to_string();
    let echoed: Value = response.json().await.unwrap();
    assert_eq!(echoed["body"], "plain text");

    let trace = proxy.state.traces.get(&trace_id).unwrap();
    assert!(trace.request_body.is_none());
    assert!(trace.response_body.is_none());

    let entries = proxy.state.logger.history(&StreamFilter::default());
    let count = entries.iter().filter(|e| e.trace_id == trace_id).count();
    assert_eq!(count, 1, "only the summary is logged");

    proxy.stop();
}

#[tokio::test]
async fn trace_endpoint_serves_finished_trace() {
    let backend = common::start_echo_backend().await;
    let proxy = common::start_proxy(common::config_with(&[(
        "api.local",
        capturing_route(format!("http://{backend}")),
    )]))
    .await;
    let stream = common::start_log_stream(proxy.state.clone(), &proxy.shutdown).await;
    let client = common::client();

    let response = client
        .put(proxy.url("/items/7"))
        .header("host", "api.local")
        .json(&json!({ "qty": 3 }))
        .send()
        .await
        .unwrap();
    let trace_id = response.headers()["x-trace-id"].to_str().unwrap().to_string();
    let _ = response.bytes().await.unwrap();

    let traces = proxy.state.traces.clone();
    let id = trace_id.clone();
    assert!(
        common::eventually(|| traces.get(&id).map(|t| t.is_finished()).unwrap_or(false)).await
    );

    let trace: Value = client
        .get(format!("http://{stream}/traces/{trace_id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(trace["id"], trace_id.as_str());
    assert_eq!(trace["method"], "PUT");
    assert_eq!(trace["statusCode"], 200);
    assert_eq!(trace["requestBody"], json!({ "qty": 3 }));

    let missing = client
        .get(format!("http://{stream}/traces/does-not-exist"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);

    proxy.stop();
}
