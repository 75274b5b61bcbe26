// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Gateway adapter seam.
//!
//! The fork engine talks to the gateway through [`GatewayApi`] so tests can
//! substitute a fake. The real implementation is a single-use WebSocket
//! conversation per call ([`client::WsGateway`]).

pub mod client;

pub use client::{GatewayEndpoint, WsGateway};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Gateway failure kinds, mapped to HTTP 502 diagnostics by the API.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway auth failed: {0}")]
    AuthFailed(String),

    #[error("gateway rejected request: {0}")]
    Rejected(String),

    #[error("gateway transport error: {0}")]
    Transport(String),

    #[error("gateway timed out after {0}s")]
    Timeout(u64),

    #[error("gateway closed unexpectedly")]
    Closed,
}

impl GatewayError {
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::AuthFailed(_) => "gateway_auth_failed",
            GatewayError::Rejected(_) => "gateway_rejected",
            GatewayError::Transport(_) => "gateway_transport_error",
            GatewayError::Timeout(_) => "gateway_timeout",
            GatewayError::Closed => "gateway_closed",
        }
    }
}

/// Outbound gateway operations used by the fork engine.
#[async_trait]
pub trait GatewayApi: Send + Sync {
    /// Execute the forked agent run and return the terminal response payload.
    async fn run_agent(
        &self,
        message: &str,
        session_key: Option<&str>,
    ) -> Result<Value, GatewayError>;

    /// Publish a message to a user channel (echoes and reply delivery).
    async fn send_message(
        &self,
        channel: &str,
        to: &str,
        thread_id: Option<&str>,
        message: &str,
    ) -> Result<Value, GatewayError>;
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeGateway, SendRecord};

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SendRecord {
        pub channel: String,
        pub to: String,
        pub thread_id: Option<String>,
        pub message: String,
    }

    /// In-memory gateway for engine tests.
    #[derive(Default)]
    pub struct FakeGateway {
        /// Next `run_agent` outcome; defaults to a minimal ok payload.
        pub agent_result: Mutex<Option<Result<Value, GatewayError>>>,
        pub agent_calls: Mutex<Vec<(String, Option<String>)>>,
        pub sends: Mutex<Vec<SendRecord>>,
        pub fail_sends: Mutex<bool>,
    }

    impl FakeGateway {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn respond_with(&self, result: Result<Value, GatewayError>) {
            *self.agent_result.lock() = Some(result);
        }
    }

    #[async_trait]
    impl GatewayApi for FakeGateway {
        async fn run_agent(
            &self,
            message: &str,
            session_key: Option<&str>,
        ) -> Result<Value, GatewayError> {
            self.agent_calls
                .lock()
                .push((message.to_string(), session_key.map(str::to_string)));
            match self.agent_result.lock().take() {
                Some(result) => result,
                None => Ok(json!({"status": "ok", "payloads": [{"text": "fake reply"}]})),
            }
        }

        async fn send_message(
            &self,
            channel: &str,
            to: &str,
            thread_id: Option<&str>,
            message: &str,
        ) -> Result<Value, GatewayError> {
            if *self.fail_sends.lock() {
                return Err(GatewayError::Transport("fake send failure".to_string()));
            }
            self.sends.lock().push(SendRecord {
                channel: channel.to_string(),
                to: to.to_string(),
                thread_id: thread_id.map(str::to_string),
                message: message.to_string(),
            });
            Ok(json!({"sent": true}))
        }
    }
}
