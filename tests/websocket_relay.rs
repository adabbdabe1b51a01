//! WebSocket upgrades relayed through the proxy.

mod common;

use std::time::Duration;

use audit_proxy::config::RouteConfig;
use audit_proxy::observability::StreamFilter;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

#[tokio::test]
async fn relays_frames_both_ways() {
    let backend = common::start_echo_backend().await;
    let proxy = common::start_proxy(common::config_with(&[(
        "ws.local",
        RouteConfig::new(format!("ws://{backend}")),
    )]))
    .await;

    let mut request = format!("ws://{}/ws", proxy.addr).into_client_request().unwrap();
    request
        .headers_mut()
        .insert("host", HeaderValue::from_static("ws.local"));
    let (mut socket, response) = connect_async(request).await.expect("upgrade through proxy");
    assert_eq!(response.status(), 101);
    assert!(response.headers().contains_key("x-trace-id"));

    socket.send(Message::Text("hello".into())).await.unwrap();
    let reply = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(reply.to_text().unwrap(), "echo: hello");

    socket.close(None).await.unwrap();

    let logger = proxy.state.logger.clone();
    assert!(
        common::eventually(|| {
            let entries = logger.history(&StreamFilter::default());
            entries.iter().any(|e| e.message.starts_with("WebSocket opened: ws.local"))
                && entries.iter().any(|e| e.message.starts_with("WebSocket closed: ws.local"))
        })
        .await
    );

    proxy.stop();
}

#[tokio::test]
async fn failed_upstream_handshake_returns_bad_gateway() {
    let dead = common::closed_port().await;
    let proxy = common::start_proxy(common::config_with(&[(
        "ws.local",
        RouteConfig::new(format!("ws://{dead}")),
    )]))
    .await;

    let mut request = format!("ws://{}/ws", proxy.addr).into_client_request().unwrap();
    request
        .headers_mut()
        .insert("host", HeaderValue::from_static("ws.local"));

    match connect_async(request).await {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), 502);
        }
        Err(e) => panic!("expected an HTTP error, got {e}"),
        Ok(_) => panic!("upgrade should not succeed"),
    }

    proxy.stop();
}

#[tokio::test]
async fn unrouted_upgrade_gets_bare_404() {
    let backend = common::start_echo_backend().await;
    let proxy = common::start_proxy(common::config_with(&[(
        "ws.local",
        RouteConfig::new(format!("ws://{backend}")),
    )]))
    .await;

    let mut request = format!("ws://{}/ws", proxy.addr).into_client_request().unwrap();
    request
        .headers_mut()
        .insert("host", HeaderValue::from_static("nowhere.local"));

    match connect_async(request).await {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), 404);
            assert!(response.body().as_ref().map_or(true, |body| body.is_empty()));
        }
        Err(e) => panic!("expected an HTTP error, got {e}"),
        Ok(_) => panic!("upgrade should not succeed"),
    }

    proxy.stop();
}
