use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method};
use serde_json::Value;
use tracing::{debug, warn};

use crate::context::AppContext;

/// Shown when a failed response carries nothing more specific
pub const GENERIC_FAILURE: &str = "Request failed";

const MAX_TEXT_MESSAGE: usize = 200;

/// Response body, JSON when it parses and raw text otherwise
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub ok: bool,
    /// HTTP status, absent when the request never got a response
    pub status: Option<u16>,
    pub data: Payload,
}

impl ApiResponse {
    pub fn json(&self) -> Option<&Value> {
        match &self.data {
            Payload::Json(value) => Some(value),
            Payload::Text(_) => None,
        }
    }

    pub fn into_json(self) -> Option<Value> {
        match self.data {
            Payload::Json(value) => Some(value),
            Payload::Text(_) => None,
        }
    }
}

/// Pull a human-readable message out of an error body: `detail`, then
/// `error`, then the raw text, then the generic string.
pub fn extract_message(data: &Payload) -> String {
    match data {
        Payload::Json(value) => ["detail", "error"]
            .iter()
            .find_map(|key| field_message(value, key))
            .unwrap_or_else(|| GENERIC_FAILURE.to_string()),
        Payload::Text(text) => {
            let line = text.lines().map(str::trim).find(|l| !l.is_empty());
            match line {
                Some(line) => line.chars().take(MAX_TEXT_MESSAGE).collect(),
                None => GENERIC_FAILURE.to_string(),
            }
        }
    }
}

pub(crate) fn field_message(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Append form-urlencoded query pairs to a path
pub fn path_with_query(path: &str, pairs: &[(&str, &str)]) -> String {
    if pairs.is_empty() {
        return path.to_string();
    }

    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs.iter())
        .finish();
    format!("{}?{}", path, query)
}

/// The single entry point for talking to the clinic API.
///
/// Every call attaches the bearer token (when logged in), and every failure
/// is normalized into an `ApiResponse` and published to the status slot.
#[derive(Clone)]
pub struct ApiGateway {
    client: Client,
    base_url: String,
    ctx: AppContext,
}

impl ApiGateway {
    pub fn new(base_url: &str, ctx: AppContext) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            ctx,
        }
    }

    pub fn with_timeout(
        base_url: &str,
        timeout: Duration,
        ctx: AppContext,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            ctx,
        })
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get(&self, path: &str) -> ApiResponse {
        self.request(Method::GET, path, None).await
    }

    pub async fn post(&self, path: &str, body: Option<&Value>) -> ApiResponse {
        self.request(Method::POST, path, body).await
    }

    pub async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> ApiResponse {
        let url = format!("{}{}", self.base_url, path);

        let mut builder = self
            .client
            .request(method.clone(), &url)
            .header(CONTENT_TYPE, "application/json");

        if let Some(token) = self.ctx.access_token() {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => return self.transport_failure(&method, path, e),
        };

        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => return self.transport_failure(&method, path, e),
        };

        let data = match serde_json::from_str::<Value>(&text) {
            Ok(value) => Payload::Json(value),
            Err(_) => Payload::Text(text),
        };

        let ok = status.is_success();
        if ok {
            debug!(%method, path, status = status.as_u16(), "request succeeded");
        } else {
            let message = extract_message(&data);
            warn!(%method, path, status = status.as_u16(), %message, "request failed");
            self.ctx.publish_error(message);
        }

        ApiResponse {
            ok,
            status: Some(status.as_u16()),
            data,
        }
    }

    fn transport_failure(&self, method: &Method, path: &str, err: reqwest::Error) -> ApiResponse {
        let message = format!("Network error: {}", err);
        warn!(%method, path, error = %err, "request did not complete");
        self.ctx.publish_error(message.clone());

        ApiResponse {
            ok: false,
            status: None,
            data: Payload::Text(message),
        }
    }
}
