use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;

use crate::http::server::AppState;
use crate::observability::{LogEntry, StreamFilter, StreamFormat};

#[derive(Debug, Deserialize)]
pub struct StreamParams {
    pub level: Option<String>,
    pub domain: Option<String>,
    #[serde(default)]
    pub format: StreamFormat,
    #[serde(default = "default_follow")]
    pub follow: bool,
    #[serde(default)]
    pub history: bool,
}

fn default_follow() -> bool {
    true
}

impl StreamParams {
    fn filter(&self) -> StreamFilter {
        StreamFilter::from_query(self.level.as_deref(), self.domain.as_deref())
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub level: Option<String>,
    pub domain: Option<String>,
}

pub async fn stream_logs(
    ws: WebSocketUpgrade,
    Query(params): Query<StreamParams>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| stream_session(socket, state, params))
}

async fn stream_session(socket: WebSocket, state: AppState, params: StreamParams) {
    let mut subscription = state.logger.subscribe(params.filter(), params.history);
    let subscriber = subscription.id();
    let format = params.format;
    let (mut sink, mut incoming) = socket.split();

    tracing::debug!(subscriber, follow = params.follow, history = params.history, "Log stream connected");

    for entry in subscription.take_history() {
        if sink.send(Message::Text(format.render(&entry).into())).await.is_err() {
            return;
        }
    }

    if !params.follow {
        let _ = sink.send(Message::Close(None)).await;
        return;
    }

    loop {
        tokio::select! {
            entry = subscription.recv() => match entry {
                Some(entry) => {
                    if sink.send(Message::Text(format.render(&entry).into())).await.is_err() {
                        break;
                    }
                }
                None => {
                    // Dropped by the broadcaster (too slow) or the logger was cleared.
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            message = incoming.next() => match message {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    tracing::debug!(subscriber, "Log stream disconnected");
}

pub async fn get_history(
    Query(params): Query<HistoryParams>,
    State(state): State<AppState>,
) -> Json<Vec<LogEntry>> {
    let filter = StreamFilter::from_query(params.level.as_deref(), params.domain.as_deref());
    let entries = state
        .logger
        .history(&filter)
        .iter()
        .map(|entry| entry.as_ref().clone())
        .collect();
    Json(entries)
}

pub async fn get_trace(Path(id): Path<String>, State(state): State<AppState>) -> Response {
    match state.traces.get(&id) {
        Some(trace) => Json(trace).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": "Trace not found",
                "traceId": id,
            })),
        )
            .into_response(),
    }
}
