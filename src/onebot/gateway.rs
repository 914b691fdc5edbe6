use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

use crate::digest::config::GatewayConfig;
use crate::error::QqsumError;
use crate::onebot::types::{ChatMessage, GatewayReply, HistoryData};

/// One page of group history, as the gateway returned it.
pub trait HistorySource {
    fn history_page(
        &self,
        group_id: i64,
        cursor: Option<i64>,
        count: u32,
    ) -> std::result::Result<Vec<ChatMessage>, QqsumError>;
}

pub struct GatewayClient {
    http: Client,
    base_url: String,
    access_token: Option<String>,
}

impl GatewayClient {
    pub fn new(cfg: &GatewayConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("failed to build gateway http client")?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            access_token: cfg
                .access_token
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(ToOwned::to_owned),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST `/{action}` with a JSON body and decode the OneBot envelope.
    /// Only transport-level problems are errors here; callers decide what a
    /// non-ok envelope means.
    pub fn call(&self, action: &str, params: &Value) -> std::result::Result<GatewayReply, QqsumError> {
        let url = format!("{}/{action}", self.base_url);
        debug!(action, %url, "gateway request");

        let mut request = self.http.post(&url).json(params);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .map_err(|err| QqsumError::Transport(format!("{action}: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(QqsumError::Transport(format!(
                "{action}: http status {status}: {}",
                body.trim()
            )));
        }
        response
            .json::<GatewayReply>()
            .map_err(|err| QqsumError::Transport(format!("{action}: invalid JSON response: {err}")))
    }
}

impl HistorySource for GatewayClient {
    fn history_page(
        &self,
        group_id: i64,
        cursor: Option<i64>,
        count: u32,
    ) -> std::result::Result<Vec<ChatMessage>, QqsumError> {
        let mut params = json!({
            "group_id": group_id,
            "reverseOrder": true,
            "count": count,
        });
        if let Some(seq) = cursor {
            params["message_seq"] = json!(seq);
        }

        let reply = self.call("get_group_msg_history", &params)?;
        if !reply.is_ok() {
            return Err(QqsumError::Transport(format!(
                "get_group_msg_history: {}",
                reply.failure_text()
            )));
        }
        if reply.data.is_null() {
            return Ok(Vec::new());
        }
        let data: HistoryData = serde_json::from_value(reply.data).map_err(|err| {
            QqsumError::Transport(format!("get_group_msg_history: malformed data: {err}"))
        })?;
        Ok(data.messages)
    }
}
