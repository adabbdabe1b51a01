//! Load testing for the audit proxy.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use audit_proxy::config::RouteConfig;

mod common;

#[tokio::test]
async fn test_load_performance() {
    let backend = common::start_echo_backend().await;
    let proxy = common::start_proxy(common::config_with(&[(
        "api.local",
        RouteConfig::new(format!("http://{backend}")),
    )]))
    .await;

    let concurrency = 20;
    let requests_per_task = 50;
    let total_requests = concurrency * requests_per_task;

    let client = common::client();
    let start = Instant::now();

    let mut handles = Vec::new();
    for _ in 0..concurrency {
        let client = client.clone();
        let url = proxy.url("/load");
        handles.push(tokio::spawn(async move {
            let mut ids = Vec::with_capacity(requests_per_task);
            for _ in 0..requests_per_task {
                let response = client
                    .get(&url)
                    .header("host", "api.local")
                    .send()
                    .await
                    .expect("request failed");
                assert_eq!(response.status(), 200);
                ids.push(
                    response.headers()["x-trace-id"]
                        .to_str()
                        .unwrap()
                        .to_string(),
                );
                let _ = response.bytes().await.unwrap();
            }
            ids
        }));
    }

    let mut ids = HashSet::new();
    for handle in handles {
        ids.extend(handle.await.unwrap());
    }

    let duration = start.elapsed();
    let rps = total_requests as f64 / duration.as_secs_f64();
    println!("Total requests: {total_requests}");
    println!("Duration: {duration:?}");
    println!("Requests per second: {rps:.2}");

    assert_eq!(ids.len(), total_requests, "every request gets its own trace id");
    assert!(duration < Duration::from_secs(30));
    assert_eq!(proxy.state.traces.started_total(), total_requests as u64);

    proxy.stop();
}
