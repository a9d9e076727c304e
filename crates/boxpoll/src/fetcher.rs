// HTTP fetcher for router API streams
//
// One GET per tick against the stream's endpoint. Freebox-style
// responses wrap their payload as `{ "success": bool, "result": ... }`;
// the envelope is stripped before the value reaches the cache. Bodies
// without a `success` field are passed through unchanged.

use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, trace};
use url::Url;

use boxpoll_core::{FetchError, Fetcher, StreamContext};

use crate::error::CliError;

/// `{ "success": false, "msg": "...", "error_code": "..." }` and friends.
#[derive(Debug, Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    result: Option<Value>,
    msg: Option<String>,
    error_code: Option<String>,
}

impl Envelope {
    fn message(&self) -> String {
        match (&self.msg, &self.error_code) {
            (Some(msg), Some(code)) => format!("{msg} ({code})"),
            (Some(msg), None) => msg.clone(),
            (None, Some(code)) => code.clone(),
            (None, None) => "request was not successful".into(),
        }
    }
}

/// Fetches one endpoint. Cheap to clone: `reqwest::Client` is shared.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    http: reqwest::Client,
    endpoint: Url,
    timeout: Duration,
}

impl HttpFetcher {
    /// `timeout` must match the one `http` was built with; it is only
    /// used to describe timeouts.
    pub fn new(http: reqwest::Client, endpoint: Url, timeout: Duration) -> Self {
        Self {
            http,
            endpoint,
            timeout,
        }
    }

    /// Build the shared client every stream's fetcher uses.
    pub fn client(timeout: Duration) -> Result<reqwest::Client, CliError> {
        reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("boxpoll/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(CliError::HttpClient)
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn get(self, ctx: StreamContext) -> Result<Value, FetchError> {
        debug!(stream = %ctx.stream, mode = %ctx.mode, forced = ctx.forced, "GET {}", self.endpoint);

        let resp = self
            .http
            .get(self.endpoint.clone())
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| self.transport_error(&e))?;
        trace!(stream = %ctx.stream, status = status.as_u16(), bytes = body.len(), "response received");

        if !status.is_success() {
            let message = serde_json::from_str::<Envelope>(&body)
                .map(|env| env.message())
                .unwrap_or_else(|_| preview(&body));
            return Err(FetchError::Remote {
                status: Some(status.as_u16()),
                message,
            });
        }

        let value: Value = serde_json::from_str(&body)
            .map_err(|e| FetchError::Decode(format!("{e} (body preview: {:?})", preview(&body))))?;
        unwrap_envelope(value, status.as_u16())
    }

    fn transport_error(&self, err: &reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout {
                timeout: self.timeout,
            }
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}

impl Fetcher<Value> for HttpFetcher {
    fn fetch(&self, ctx: StreamContext) -> BoxFuture<'static, Result<Value, FetchError>> {
        Box::pin(self.clone().get(ctx))
    }
}

fn unwrap_envelope(value: Value, status: u16) -> Result<Value, FetchError> {
    let is_envelope = value.as_object().is_some_and(|obj| obj.contains_key("success"));
    if !is_envelope {
        return Ok(value);
    }
    let envelope: Envelope =
        serde_json::from_value(value).map_err(|e| FetchError::Decode(e.to_string()))?;
    if envelope.success {
        Ok(envelope.result.unwrap_or(Value::Null))
    } else {
        Err(FetchError::Remote {
            status: Some(status),
            message: envelope.message(),
        })
    }
}

fn preview(body: &str) -> String {
    body.chars().take(200).collect()
}
