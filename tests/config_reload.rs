//! Hot reload of routes and levels.

mod common;

use std::path::PathBuf;
use std::time::Duration;

use audit_proxy::config::{ConfigEvent, RouteConfig};
use audit_proxy::lifecycle::{launch, LaunchOptions};
use audit_proxy::observability::{LogLevel, StreamFilter};
use serde_json::json;

fn write_config(dir_name: &str, routes: serde_json::Value) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("audit-proxy-{dir_name}-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("audit-proxy.json");
    rewrite_config(&path, routes);
    path
}

fn rewrite_config(path: &PathBuf, routes: serde_json::Value) {
    let document = json!({
        "routes": routes,
        "global": {
            "logging": { "console": false, "level": "debug" }
        }
    });
    std::fs::write(path, serde_json::to_vec_pretty(&document).unwrap()).unwrap();
}

fn options(watch: bool) -> LaunchOptions {
    LaunchOptions {
        proxy_address: Some("127.0.0.1:0".to_string()),
        stream_address: Some("127.0.0.1:0".to_string()),
        watch,
    }
}

#[tokio::test]
async fn changed_event_swaps_route_table() {
    let first = common::start_echo_backend().await;
    let second = common::start_echo_backend().await;
    let proxy = common::start_proxy(common::config_with(&[(
        "api.local",
        RouteConfig::new(format!("http://{first}")),
    )]))
    .await;
    let client = common::client();

    let response = client
        .get(proxy.url("/"))
        .header("host", "web.local")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    let next = common::config_with(&[
        ("api.local", RouteConfig::new(format!("http://{first}"))),
        ("web.local", RouteConfig::new(format!("http://{second}"))),
    ]);
    proxy.updates.send(ConfigEvent::Changed(next)).unwrap();

    let state = proxy.state.clone();
    assert!(common::eventually(|| state.snapshot().routes.len() == 2).await);

    let response = client
        .get(proxy.url("/"))
        .header("host", "web.local")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let reloaded = proxy
        .state
        .logger
        .history(&StreamFilter::default())
        .into_iter()
        .find(|e| e.message == "Configuration reloaded")
        .expect("reload entry");
    assert_eq!(reloaded.trace_id, "system");
    assert_eq!(reloaded.data, Some(json!({ "routes": 2 })));

    proxy.stop();
}

#[tokio::test]
async fn reload_updates_domain_levels() {
    let backend = common::start_echo_backend().await;
    let proxy = common::start_proxy(common::config_with(&[(
        "api.local",
        RouteConfig::new(format!("http://{backend}")),
    )]))
    .await;
    assert_eq!(proxy.state.logger.level_for(Some("api.local")), LogLevel::Info);

    let mut quiet = RouteConfig::new(format!("http://{backend}"));
    quiet.log_level = Some(LogLevel::Error);
    let next = common::config_with(&[("api.local", quiet)]);
    proxy.updates.send(ConfigEvent::Changed(next)).unwrap();

    let logger = proxy.state.logger.clone();
    assert!(common::eventually(|| logger.level_for(Some("api.local")) == LogLevel::Error).await);

    let response = common::client()
        .get(proxy.url("/ok"))
        .header("host", "api.local")
        .send()
        .await
        .unwrap();
    let trace_id = response.headers()["x-trace-id"].to_str().unwrap().to_string();
    assert_eq!(response.status(), 200);
    let _ = response.bytes().await.unwrap();

    let logged = proxy
        .state
        .logger
        .history(&StreamFilter::default())
        .iter()
        .any(|e| e.trace_id == trace_id);
    assert!(!logged, "info summary is below the route's level");

    proxy.stop();
}

#[tokio::test]
async fn launch_watches_the_config_file() {
    let first = common::start_echo_backend().await;
    let second = common::start_echo_backend().await;
    let path = write_config(
        "watch",
        json!({ "api.local": { "target": format!("http://{first}") } }),
    );

    let running = launch(&path, options(true)).await.expect("launch");
    assert!(running.stream_addr.is_some());
    let proxy_url = format!("http://{}/", running.proxy_addr);
    let client = common::client();

    let response = client
        .get(&proxy_url)
        .header("host", "api.local")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    tokio::time::sleep(Duration::from_millis(100)).await;
    rewrite_config(
        &path,
        json!({
            "api.local": { "target": format!("http://{first}") },
            "web.local": { "target": format!("http://{second}") }
        }),
    );

    let state = running.state();
    let mut swapped = false;
    for _ in 0..100 {
        if state.snapshot().routes.len() == 2 {
            swapped = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(swapped, "file change should reload routes");

    // The listener address override survives the reload.
    let response = client
        .get(&proxy_url)
        .header("host", "web.local")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    running.stop().await;
    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[tokio::test]
async fn launch_rejects_invalid_config() {
    let path = write_config("invalid", json!({ "api.local": { "target": "ftp://nope" } }));

    let result = launch(&path, options(false)).await;
    assert!(result.is_err());

    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}
