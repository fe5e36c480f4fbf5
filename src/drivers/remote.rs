//! Remote endpoint driver.
//!
//! Drives a device that lives behind a REST bridge instead of local
//! hardware. Every operation becomes a wire-contract POST; replies pass
//! through as JSON. The broker uses this same driver as the fallback
//! session for hybrid descriptors.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::error::{HalError, Result};
use crate::core::logging::{DeviceLogConfig, DeviceLogHandler, LogContext};
use crate::core::metadata::{DriverMetadata, HasMetadata, ParameterMetadata, ParameterType};
use crate::core::traits::{
    ConnectAck, ConnectMethod, ConnectionState, Diagnostics, Driver, ReadPayload,
    RemoteEndpointConfig, WriteAck,
};
use crate::transport::http::RemoteEndpoint;

use super::OpCounters;

/// Registry key of the built-in remote driver.
pub const DRIVER_NAME: &str = "remote";

/// Driver that forwards every operation to a remote endpoint.
pub struct RemoteDriver {
    endpoint: RemoteEndpoint,
    state: ConnectionState,
    counters: OpCounters,
    log: LogContext,
}

impl RemoteDriver {
    /// Build a driver for one endpoint. Fails on an unusable URL, so a
    /// constructed driver is always considered available.
    pub fn new(config: &RemoteEndpointConfig) -> Result<Self> {
        Ok(Self {
            endpoint: RemoteEndpoint::new(config)?,
            state: ConnectionState::Disconnected,
            counters: OpCounters::default(),
            log: LogContext::noop(DRIVER_NAME),
        })
    }

    #[must_use]
    pub fn with_log_handler(
        mut self,
        handler: Arc<dyn DeviceLogHandler>,
        config: DeviceLogConfig,
    ) -> Self {
        self.log = LogContext::new(DRIVER_NAME, handler, config);
        self
    }

    pub fn endpoint_url(&self) -> &str {
        self.endpoint.url()
    }

    async fn set_state(&mut self, to: ConnectionState) {
        if self.state != to {
            self.log.log_state(self.state, to).await;
            self.state = to;
        }
    }
}

#[async_trait]
impl Driver for RemoteDriver {
    fn name(&self) -> &'static str {
        DRIVER_NAME
    }

    fn connection_state(&self) -> ConnectionState {
        self.state
    }

    async fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            driver: DRIVER_NAME.into(),
            connection_state: self.state,
            read_count: self.counters.reads,
            write_count: self.counters.writes,
            error_count: self.counters.errors,
            last_error: self.counters.last_error.clone(),
            extra: json!({ "endpoint": self.endpoint.url() }),
        }
    }

    /// Endpoint validity is established at construction; detect performs
    /// no probe request.
    async fn detect(&mut self) -> Result<bool> {
        Ok(true)
    }

    async fn connect(&mut self, options: &Value) -> Result<ConnectAck> {
        if self.state.is_connected() {
            return Err(HalError::AlreadyConnected(DRIVER_NAME.into()));
        }
        self.set_state(ConnectionState::Connecting).await;
        match self.endpoint.call("connect", options).await {
            Ok(reply) => {
                self.set_state(ConnectionState::Connected).await;
                self.log.log_connected(ConnectMethod::Fallback).await;
                Ok(ConnectAck::ok().with_data(reply))
            }
            Err(err) => {
                self.counters.record_error(&err);
                self.log.log_error("connect", err.to_string()).await;
                self.set_state(ConnectionState::Error).await;
                Err(err)
            }
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        if !self.state.is_connected() {
            self.set_state(ConnectionState::Disconnected).await;
            return Ok(());
        }
        let result = self.endpoint.call("disconnect", &Value::Null).await;
        self.set_state(ConnectionState::Disconnected).await;
        self.log.log_disconnected().await;
        if let Err(err) = result {
            // The local session ends regardless of what the remote said.
            self.counters.record_error(&err);
            self.log.log_warning("disconnect", err.to_string()).await;
        }
        Ok(())
    }

    async fn read(&mut self, params: &Value) -> Result<ReadPayload> {
        if !self.state.is_connected() {
            return Err(HalError::NotConnected(DRIVER_NAME.into()));
        }
        self.log.log_request("read", params.to_string()).await;
        match self.endpoint.call("read", params).await {
            Ok(reply) => {
                self.counters.record_read();
                Ok(ReadPayload::Json(reply))
            }
            Err(err) => {
                self.counters.record_error(&err);
                self.log.log_error("read", err.to_string()).await;
                Err(err)
            }
        }
    }

    async fn write(&mut self, params: &Value) -> Result<WriteAck> {
        if !self.state.is_connected() {
            return Err(HalError::NotConnected(DRIVER_NAME.into()));
        }
        self.log.log_request("write", params.to_string()).await;
        match self.endpoint.call("write", params).await {
            Ok(reply) => {
                self.counters.record_write();
                Ok(WriteAck::Json(reply))
            }
            Err(err) => {
                self.counters.record_error(&err);
                self.log.log_error("write", err.to_string()).await;
                Err(err)
            }
        }
    }
}

impl HasMetadata for RemoteDriver {
    fn metadata() -> DriverMetadata {
        DriverMetadata {
            name: DRIVER_NAME,
            display_name: "Remote Endpoint",
            description: "Forwards every operation to a REST endpoint speaking \
                          the action wire contract",
            example_options: json!({
                "url": "http://127.0.0.1:9000/hal",
                "timeout": 5000,
            }),
            parameters: vec![
                ParameterMetadata::required(
                    "url",
                    "Endpoint URL",
                    "Base URL the wire-contract POSTs go to",
                    ParameterType::String,
                ),
                ParameterMetadata::optional(
                    "timeout",
                    "Timeout",
                    "Request timeout in milliseconds",
                    ParameterType::Integer,
                    json!(5000),
                ),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::{Json, Router};

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/hal")
    }

    fn echo_app() -> Router {
        Router::new().route(
            "/hal",
            post(|Json(body): Json<Value>| async move { Json(json!({ "echo": body })) }),
        )
    }

    #[tokio::test]
    async fn full_session_round_trip() {
        let url = serve(echo_app()).await;
        let mut driver = RemoteDriver::new(&RemoteEndpointConfig::new(url)).unwrap();

        let ack = driver.connect(&json!({ "profile": "bench" })).await.unwrap();
        let data = ack.data.unwrap();
        assert_eq!(data["echo"]["action"], "connect");
        assert_eq!(data["echo"]["profile"], "bench");
        assert_eq!(driver.connection_state(), ConnectionState::Connected);

        let payload = driver.read(&json!({ "address": 0 })).await.unwrap();
        match payload {
            ReadPayload::Json(value) => assert_eq!(value["echo"]["action"], "read"),
            other => panic!("expected json payload, got {other:?}"),
        }

        let ack = driver.write(&json!({ "value": 1 })).await.unwrap();
        match ack {
            WriteAck::Json(value) => assert_eq!(value["echo"]["action"], "write"),
            other => panic!("expected json ack, got {other:?}"),
        }

        driver.disconnect().await.unwrap();
        assert_eq!(driver.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn detect_never_touches_the_network() {
        // Nothing listens on the discard port; detect must still be true.
        let config = RemoteEndpointConfig::new("http://127.0.0.1:9/hal");
        let mut driver = RemoteDriver::new(&config).unwrap();
        assert!(driver.detect().await.unwrap());
    }

    #[tokio::test]
    async fn operations_require_connect_first() {
        let url = serve(echo_app()).await;
        let mut driver = RemoteDriver::new(&RemoteEndpointConfig::new(url)).unwrap();

        let err = driver.read(&Value::Null).await.unwrap_err();
        assert!(matches!(err, HalError::NotConnected(_)));
        let err = driver.write(&Value::Null).await.unwrap_err();
        assert!(matches!(err, HalError::NotConnected(_)));
    }

    #[tokio::test]
    async fn error_status_fails_the_connect() {
        let app = Router::new().route(
            "/hal",
            post(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        );
        let url = serve(app).await;
        let mut driver = RemoteDriver::new(&RemoteEndpointConfig::new(url)).unwrap();

        let err = driver.connect(&Value::Null).await.unwrap_err();
        assert!(err.to_string().contains("500"));
        assert_eq!(driver.connection_state(), ConnectionState::Error);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent_and_survives_remote_failure() {
        let app = Router::new().route(
            "/hal",
            post(|Json(body): Json<Value>| async move {
                if body["action"] == "connect" {
                    Json(json!({ "ok": true })).into_response()
                } else {
                    StatusCode::BAD_GATEWAY.into_response()
                }
            }),
        );
        let url = serve(app).await;
        let mut driver = RemoteDriver::new(&RemoteEndpointConfig::new(url)).unwrap();

        driver.connect(&Value::Null).await.unwrap();
        driver.disconnect().await.unwrap();
        assert_eq!(driver.connection_state(), ConnectionState::Disconnected);

        driver.disconnect().await.unwrap();
        let diagnostics = driver.diagnostics().await;
        assert_eq!(diagnostics.error_count, 1);
    }
}
