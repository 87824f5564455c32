//! The `/ws` status socket.

use std::{net::SocketAddr, sync::Arc, time::Instant};

use {
    axum::{
        extract::{
            ConnectInfo, Query, State, WebSocketUpgrade,
            ws::{Message, WebSocket},
        },
        http::HeaderMap,
        response::{IntoResponse, Response},
    },
    futures::{SinkExt, stream::StreamExt},
    serde::Deserialize,
    tokio::sync::mpsc,
    tracing::{debug, info},
};

use crate::{
    auth_middleware::{check_admin_token, header_token},
    server::AppState,
    state::{ConnectedClient, GatewayState},
};

#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// Client-to-server frame.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum ClientFrame {
    GetStatus,
}

pub async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> Response {
    let token = header_token(&headers).or(query.token.as_deref());
    if let Err(e) = check_admin_token(&state.gateway, token) {
        debug!(remote = %addr, status = %e.status(), "ws: rejected upgrade");
        return e.into_response();
    }
    ws.on_upgrade(move |socket| handle_connection(socket, state.gateway, addr))
}

/// Serve one observer until it disconnects.
pub async fn handle_connection(socket: WebSocket, state: Arc<GatewayState>, remote_addr: SocketAddr) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, remote_ip = %remote_addr.ip(), "ws: new connection");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (client_tx, mut client_rx) = mpsc::unbounded_channel::<String>();

    // Forward queued frames to the socket.
    let write_conn_id = conn_id.clone();
    let write_handle = tokio::spawn(async move {
        while let Some(msg) = client_rx.recv().await {
            if ws_tx.send(Message::Text(msg.into())).await.is_err() {
                debug!(conn_id = %write_conn_id, "ws: write loop closed");
                break;
            }
        }
    });

    state
        .broadcaster
        .register(ConnectedClient {
            conn_id: conn_id.clone(),
            remote_ip: remote_addr.ip().to_string(),
            sender: client_tx.clone(),
            connected_at: Instant::now(),
        })
        .await;

    while let Some(msg) = ws_rx.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };
        match serde_json::from_str::<ClientFrame>(text.as_str()) {
            Ok(ClientFrame::GetStatus) => {
                for frame in state.broadcaster.snapshot().frames() {
                    let _ = client_tx.send(frame);
                }
            },
            Err(e) => debug!(conn_id = %conn_id, error = %e, "ws: ignoring unknown frame"),
        }
    }

    let duration = state
        .broadcaster
        .remove(&conn_id)
        .await
        .map(|c| c.connected_at.elapsed())
        .unwrap_or_default();
    drop(client_tx);
    write_handle.abort();
    info!(conn_id = %conn_id, duration_secs = duration.as_secs(), "ws: connection closed");
}
