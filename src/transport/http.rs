//! HTTP client for the remote fallback endpoint.
//!
//! Every operation is a POST of a JSON object carrying an `action` field
//! plus the operation's own parameters; the reply body is JSON as well.
//! Any non-2xx status is a hard failure, whatever the body says.

use std::time::Duration;

use reqwest::{Client, Url};
use serde_json::{Map, Value};

use crate::core::error::{HalError, Result};
use crate::core::traits::RemoteEndpointConfig;

/// One configured fallback endpoint.
#[derive(Debug, Clone)]
pub struct RemoteEndpoint {
    base_url: Url,
    client: Client,
}

impl RemoteEndpoint {
    pub fn new(config: &RemoteEndpointConfig) -> Result<Self> {
        let base_url = Url::parse(&config.url)
            .map_err(|err| HalError::config(format!("invalid endpoint url {:?}: {err}", config.url)))?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self { base_url, client })
    }

    pub fn url(&self) -> &str {
        self.base_url.as_str()
    }

    /// POST `{action, ...params}` and return the JSON reply.
    ///
    /// `params` must be a JSON object or `null`; the `action` field is
    /// injected on top of it.
    pub async fn call(&self, action: &str, params: &Value) -> Result<Value> {
        let mut body = match params {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                return Err(HalError::config(format!(
                    "remote call parameters must be a JSON object, got {other}"
                )))
            }
        };
        body.insert("action".to_owned(), Value::String(action.to_owned()));

        let response = self
            .client
            .post(self.base_url.clone())
            .json(&Value::Object(body))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(HalError::transport(format!(
                "remote endpoint returned HTTP {status}"
            )));
        }
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/hal")
    }

    #[tokio::test]
    async fn call_injects_action_and_returns_reply() {
        let app = Router::new().route(
            "/hal",
            post(|Json(body): Json<Value>| async move { Json(json!({ "echo": body })) }),
        );
        let url = serve(app).await;

        let endpoint = RemoteEndpoint::new(&RemoteEndpointConfig::new(url)).unwrap();
        let reply = endpoint
            .call("read", &json!({ "address": 0, "quantity": 2 }))
            .await
            .unwrap();
        assert_eq!(reply["echo"]["action"], "read");
        assert_eq!(reply["echo"]["quantity"], 2);
    }

    #[tokio::test]
    async fn null_params_become_a_bare_action() {
        let app = Router::new().route(
            "/hal",
            post(|Json(body): Json<Value>| async move { Json(body) }),
        );
        let url = serve(app).await;

        let endpoint = RemoteEndpoint::new(&RemoteEndpointConfig::new(url)).unwrap();
        let reply = endpoint.call("connect", &Value::Null).await.unwrap();
        assert_eq!(reply, json!({ "action": "connect" }));
    }

    #[tokio::test]
    async fn non_object_params_are_rejected_before_any_request() {
        let endpoint =
            RemoteEndpoint::new(&RemoteEndpointConfig::new("http://127.0.0.1:9/hal")).unwrap();
        let err = endpoint.call("read", &json!([1, 2])).await.unwrap_err();
        assert!(matches!(err, HalError::Config(_)));
    }

    #[tokio::test]
    async fn non_2xx_status_is_a_hard_failure() {
        let app = Router::new().route(
            "/hal",
            post(|| async { (StatusCode::BAD_GATEWAY, Json(json!({ "ok": true }))) }),
        );
        let url = serve(app).await;

        let endpoint = RemoteEndpoint::new(&RemoteEndpointConfig::new(url)).unwrap();
        let err = endpoint.call("connect", &Value::Null).await.unwrap_err();
        assert!(err.to_string().contains("502"));
    }

    #[test]
    fn invalid_url_is_a_config_error() {
        let err = RemoteEndpoint::new(&RemoteEndpointConfig::new("not a url")).unwrap_err();
        assert!(matches!(err, HalError::Config(_)));
    }
}
