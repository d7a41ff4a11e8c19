//! WebSocket transport for terminal sessions.

use std::io;

use async_trait::async_trait;
use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use hostpanel_core::session::{DuplexChannel, FrameSink, FrameSource};
use tracing::{error, info};

use crate::auth::CurrentUser;

use super::error::ApiResult;
use super::state::AppState;

/// A WebSocket carrying terminal frames. Text and binary messages are both input.
pub struct WsChannel {
    socket: WebSocket,
}

impl WsChannel {
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

impl DuplexChannel for WsChannel {
    type Sink = WsSink;
    type Source = WsSource;

    fn split(self) -> (WsSink, WsSource) {
        let (tx, rx) = self.socket.split();
        (WsSink { tx }, WsSource { rx })
    }
}

pub struct WsSink {
    tx: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, frame: Bytes) -> io::Result<()> {
        self.tx
            .send(Message::Binary(frame))
            .await
            .map_err(io::Error::other)
    }

    async fn close(&mut self) {
        let _ = self.tx.close().await;
    }
}

pub struct WsSource {
    rx: SplitStream<WebSocket>,
}

#[async_trait]
impl FrameSource for WsSource {
    async fn recv(&mut self) -> Option<io::Result<Bytes>> {
        loop {
            match self.rx.next().await? {
                Ok(Message::Text(text)) => {
                    return Some(Ok(Bytes::copy_from_slice(text.as_str().as_bytes())));
                }
                Ok(Message::Binary(data)) => return Some(Ok(data)),
                Ok(Message::Close(_)) => return None,
                // Pings are answered by axum.
                Ok(Message::Ping(_) | Message::Pong(_)) => continue,
                Err(err) => return Some(Err(io::Error::other(err))),
            }
        }
    }
}

/// Upgrade to a WebSocket and bridge it to a new shell session.
///
/// Browsers cannot set headers on WebSocket requests, so the token is usually
/// supplied as the `token` query parameter.
pub async fn terminal_ws(
    State(state): State<AppState>,
    user: CurrentUser,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    // Fail before the upgrade when the tenant cannot get a root.
    state.sandbox.tenant_root(user.id())?;
    let principal = user.principal();

    Ok(ws.on_upgrade(move |socket| async move {
        match state.sessions.open(&principal, WsChannel::new(socket)).await {
            Ok(session_id) => {
                info!(session_id = %session_id, tenant = %principal.tenant, "terminal attached");
            }
            Err(err) => {
                error!(tenant = %principal.tenant, "failed to open terminal session: {}", err);
            }
        }
    }))
}
