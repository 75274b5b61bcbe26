// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-use gateway conversation over WebSocket.
//!
//! Every call opens a fresh connection, authenticates with the signed device
//! payload, issues one request, and resolves on the matching terminal
//! response. Intermediate `accepted` acks and `event` progress frames are
//! skipped. Hard deadlines: 120 s for `agent`, 30 s for `send`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use forked_core::{session_agent_id, Clock};

use crate::identity::Identity;

use super::{GatewayApi, GatewayError};

/// Protocol version spoken on the gateway channel.
const PROTOCOL: u64 = 3;

const ROLE: &str = "operator";
const SCOPES: [&str; 2] = ["operator.admin", "operator.write"];

/// Deadline for `agent` requests (the forked run itself).
pub const AGENT_DEADLINE: Duration = Duration::from_secs(120);

/// Deadline for `send` requests (echoes and reply delivery).
pub const SEND_DEADLINE: Duration = Duration::from_secs(30);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Gateway endpoint extracted from the host config.
#[derive(Debug, Clone)]
pub struct GatewayEndpoint {
    pub url: String,
    pub token: Option<String>,
}

/// WebSocket gateway client.
pub struct WsGateway<C: Clock> {
    endpoint: GatewayEndpoint,
    identity: Arc<Identity>,
    clock: C,
    instance_id: String,
}

impl<C: Clock> WsGateway<C> {
    pub fn new(endpoint: GatewayEndpoint, identity: Arc<Identity>, clock: C) -> Self {
        Self {
            endpoint,
            identity,
            clock,
            instance_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    async fn call(
        &self,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, GatewayError> {
        match tokio::time::timeout(deadline, self.exchange(method, params)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(deadline.as_secs())),
        }
    }

    /// connect → handshake → request → terminal response.
    async fn exchange(&self, method: &str, params: Value) -> Result<Value, GatewayError> {
        let (mut ws, _) = connect_async(self.endpoint.url.as_str())
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let device = self.identity.sign_auth_payload(
            &SCOPES,
            ROLE,
            self.endpoint.token.as_deref(),
            None,
            self.clock.epoch_ms(),
        );
        let connect_params = json!({
            "minProtocol": PROTOCOL,
            "maxProtocol": PROTOCOL,
            "client": {
                "id": "forked",
                "version": crate::env::DAEMON_VERSION,
                "platform": std::env::consts::OS,
                "mode": "debugger",
                "instanceId": self.instance_id,
            },
            "role": ROLE,
            "scopes": SCOPES,
            "auth": {"token": self.endpoint.token},
            "device": device,
        });

        send_request(&mut ws, "0", "connect", connect_params).await?;
        let hello = await_response(&mut ws, "0").await?;
        if !frame_ok(&hello) {
            return Err(GatewayError::AuthFailed(frame_error(&hello)));
        }

        send_request(&mut ws, "1", method, params).await?;
        let response = await_response(&mut ws, "1").await?;
        let _ = ws.close(None).await;

        if !frame_ok(&response) {
            return Err(GatewayError::Rejected(frame_error(&response)));
        }
        Ok(response.get("payload").cloned().unwrap_or(response))
    }
}

#[async_trait]
impl<C: Clock> GatewayApi for WsGateway<C> {
    async fn run_agent(
        &self,
        message: &str,
        session_key: Option<&str>,
    ) -> Result<Value, GatewayError> {
        let mut params = json!({
            "message": message,
            "agentId": session_agent_id(session_key),
            "idempotencyKey": uuid::Uuid::new_v4().to_string(),
            "timeout": 120,
        });
        if let (Some(key), Some(map)) = (session_key, params.as_object_mut()) {
            map.insert("sessionKey".to_string(), Value::from(key));
        }
        self.call("agent", params, AGENT_DEADLINE).await
    }

    async fn send_message(
        &self,
        channel: &str,
        to: &str,
        thread_id: Option<&str>,
        message: &str,
    ) -> Result<Value, GatewayError> {
        let mut params = json!({
            "channel": channel,
            "to": to,
            "message": message,
            "idempotencyKey": uuid::Uuid::new_v4().to_string(),
        });
        if let (Some(thread), Some(map)) = (thread_id, params.as_object_mut()) {
            map.insert("threadId".to_string(), Value::from(thread));
        }
        self.call("send", params, SEND_DEADLINE).await
    }
}

async fn send_request(
    ws: &mut WsStream,
    id: &str,
    method: &str,
    params: Value,
) -> Result<(), GatewayError> {
    let frame = json!({"type": "req", "id": id, "method": method, "params": params});
    let text = serde_json::to_string(&frame)
        .map_err(|e| GatewayError::Transport(e.to_string()))?;
    ws.send(Message::text(text))
        .await
        .map_err(|e| GatewayError::Transport(e.to_string()))
}

/// Read frames until the terminal `res` with the matching id.
///
/// `event` frames and `accepted` intermediate responses are skipped.
async fn await_response(ws: &mut WsStream, id: &str) -> Result<Value, GatewayError> {
    while let Some(message) = ws.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let Ok(frame) = serde_json::from_str::<Value>(text.as_str()) else {
                    debug!("skipping unparseable gateway frame");
                    continue;
                };
                if frame.get("type").and_then(Value::as_str) != Some("res") {
                    continue;
                }
                if frame.get("id").and_then(Value::as_str) != Some(id) {
                    continue;
                }
                if frame.pointer("/payload/status").and_then(Value::as_str) == Some("accepted") {
                    continue;
                }
                return Ok(frame);
            }
            Ok(Message::Close(_)) => return Err(GatewayError::Closed),
            Ok(_) => continue, // ping/pong/binary
            Err(e) => return Err(GatewayError::Transport(e.to_string())),
        }
    }
    Err(GatewayError::Closed)
}

fn frame_ok(frame: &Value) -> bool {
    frame.get("ok").and_then(Value::as_bool).unwrap_or(true) && frame.get("error").is_none()
}

fn frame_error(frame: &Value) -> String {
    if let Some(error) = frame.get("error") {
        if let Some(message) = error.get("message").and_then(Value::as_str) {
            return message.to_string();
        }
        if let Some(message) = error.as_str() {
            return message.to_string();
        }
        return error.to_string();
    }
    "request failed".to_string()
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
