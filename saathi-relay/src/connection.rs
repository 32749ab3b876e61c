use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use saathi_auth::{verify_token, Claims, TokenError};
use saathi_proto::{ClientEvent, ServerEvent};
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket};

use crate::error::RelayError;
use crate::registry::Connection;
use crate::State;

/// Close code sent when the handshake credential is rejected.
pub const UNAUTHORIZED_CLOSE: u16 = 4401;

/// How long queued frames may take to flush once the connection ends.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

fn authenticate(token: Option<&str>, secret: &str) -> Result<Claims, RelayError> {
    let token = token.ok_or(TokenError::Missing)?;
    Ok(verify_token(secret, token)?)
}

/// Serve one websocket from handshake to close.
pub async fn client_connection(ws: WebSocket, token: Option<String>, state: Arc<State>) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let claims = match authenticate(token.as_deref(), &state.jwt_secret) {
        Ok(claims) => claims,
        Err(err) => {
            log::info!("rejecting websocket: {err}");
            if let Ok(frame) = ServerEvent::error(err.client_message()).to_json() {
                let _ = ws_tx.send(Message::text(frame)).await;
            }
            let _ = ws_tx
                .send(Message::close_with(UNAUTHORIZED_CLOSE, "unauthorized"))
                .await;
            return;
        }
    };

    let (out_tx, mut out_rx) = mpsc::channel::<ServerEvent>(state.channel_buffer);
    let mut writer = tokio::task::spawn(async move {
        while let Some(event) = out_rx.recv().await {
            let frame = match event.to_json() {
                Ok(frame) => frame,
                Err(err) => {
                    log::warn!("dropping unserializable {} event: {err}", event.name());
                    continue;
                }
            };
            if ws_tx.send(Message::text(frame)).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let conn = Connection::new(claims.user_id, claims.is_admin, out_tx);
    let evicted = conn.evicted();
    log::info!(
        "user {} connected (connection {}, admin: {})",
        conn.user_id,
        conn.id,
        conn.is_admin
    );
    state.engine.connect(&conn).await;

    loop {
        let next = tokio::select! {
            next = ws_rx.next() => next,
            _ = evicted.notified() => {
                log::warn!("closing connection {} of user {}: too slow", conn.id, conn.user_id);
                break;
            }
        };
        let msg = match next {
            Some(Ok(msg)) => msg,
            Some(Err(err)) => {
                log::debug!("websocket error for user {}: {err}", conn.user_id);
                break;
            }
            None => break,
        };
        if msg.is_close() {
            break;
        }
        let Ok(text) = msg.to_str() else {
            continue;
        };

        // Awaiting here keeps one connection's events in arrival order.
        match ClientEvent::parse(text) {
            Ok(event) => {
                if !state.engine.handle_event(&conn, event).await {
                    break;
                }
            }
            Err(err) => {
                log::debug!("unreadable frame from user {}: {err}", conn.user_id);
                let _ = conn.send(ServerEvent::error(format!("Invalid message: {err}")));
            }
        }
    }

    state.engine.disconnect(&conn).await;
    log::info!("user {} disconnected (connection {})", conn.user_id, conn.id);
    drop(conn);
    if tokio::time::timeout(FLUSH_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }
}
