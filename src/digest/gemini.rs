use base64::Engine as _;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use std::fmt;
use std::fs;
use std::io::{BufRead, BufReader};
use std::time::Duration;
use tracing::{debug, info};

use crate::digest::config::GeminiConfig;
use crate::digest::media::mime_type_for;
use crate::digest::prompt::PromptBundle;
use crate::error::QqsumError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UsageMetadata {
    pub prompt_token_count: u64,
    pub candidates_token_count: u64,
    pub total_token_count: u64,
    pub thoughts_token_count: Option<u64>,
    pub cached_content_token_count: Option<u64>,
}

impl fmt::Display for UsageMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "prompt={} candidates={} total={}",
            self.prompt_token_count, self.candidates_token_count, self.total_token_count
        )?;
        if let Some(thoughts) = self.thoughts_token_count {
            write!(f, " thoughts={thoughts}")?;
        }
        if let Some(cached) = self.cached_content_token_count {
            write!(f, " cached={cached}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamChunk {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    pub model_version: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<ChunkContent>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkContent {
    #[serde(default)]
    pub parts: Vec<ChunkPart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkPart {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub thought: Option<bool>,
}

impl StreamChunk {
    /// Visible text of the first candidate; thought summaries are skipped.
    pub fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter(|p| p.thought != Some(true))
                    .filter_map(|p| p.text.as_deref())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.candidates.first()?.finish_reason.as_deref()
    }
}

/// Server-sent events reader yielding one decoded chunk per `data:` event.
pub struct SseChunks<R> {
    reader: R,
    finished: bool,
}

impl<R: BufRead> SseChunks<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            finished: false,
        }
    }

    fn next_event(&mut self) -> std::io::Result<Option<String>> {
        let mut data = String::new();
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                self.finished = true;
                return Ok((!data.is_empty()).then_some(data));
            }
            let trimmed = line.trim_end_matches(['\r', '\n']);
            if trimmed.is_empty() {
                if !data.is_empty() {
                    return Ok(Some(data));
                }
                continue;
            }
            if let Some(payload) = trimmed.strip_prefix("data:") {
                if !data.is_empty() {
                    data.push('\n');
                }
                data.push_str(payload.strip_prefix(' ').unwrap_or(payload));
            }
        }
    }
}

impl<R: BufRead> Iterator for SseChunks<R> {
    type Item = Result<StreamChunk, String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.finished {
                return None;
            }
            let event = match self.next_event() {
                Ok(Some(event)) => event,
                Ok(None) => return None,
                Err(err) => {
                    self.finished = true;
                    return Some(Err(format!("stream read failed: {err}")));
                }
            };
            if event.trim() == "[DONE]" {
                continue;
            }
            return Some(match serde_json::from_str::<Value>(&event) {
                Ok(value) => {
                    if let Some(error) = value.get("error") {
                        self.finished = true;
                        Err(format!("api error in stream: {error}"))
                    } else {
                        serde_json::from_value(value)
                            .map_err(|err| format!("undecodable stream chunk: {err}"))
                    }
                }
                Err(err) => Err(format!("invalid JSON in stream: {err}")),
            });
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StreamSummary {
    pub chunks: usize,
    pub chars: usize,
    pub usage: Option<UsageMetadata>,
    pub model_version: Option<String>,
    pub finish_reason: Option<String>,
}

/// Drain `chunks`, handing each text delta to `on_text` as soon as it
/// arrives. A failure carries the usage seen on the last good chunk.
pub fn consume_stream<I>(chunks: I, mut on_text: impl FnMut(&str)) -> Result<StreamSummary, QqsumError>
where
    I: IntoIterator<Item = Result<StreamChunk, String>>,
{
    let mut summary = StreamSummary::default();
    for item in chunks {
        let chunk = item.map_err(|message| QqsumError::Stream {
            message,
            usage: summary.usage.clone(),
        })?;
        summary.chunks += 1;
        let text = chunk.text();
        if !text.is_empty() {
            summary.chars += text.chars().count();
            on_text(&text);
        }
        if let Some(reason) = chunk.finish_reason() {
            summary.finish_reason = Some(reason.to_string());
        }
        if let Some(usage) = chunk.usage_metadata {
            summary.usage = Some(usage);
        }
        if let Some(version) = chunk.model_version {
            summary.model_version = Some(version);
        }
    }
    Ok(summary)
}

pub struct GeminiClient {
    http: Client,
    model: String,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    /// Refuses to build without a real credential, so no request is ever
    /// sent with a placeholder key.
    pub fn new(cfg: &GeminiConfig) -> Result<Self, QqsumError> {
        if !cfg.has_usable_key() {
            return Err(QqsumError::configuration(
                "gemini api key is missing or still the placeholder; set GEMINI_API_KEY",
            ));
        }
        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|err| QqsumError::configuration(format!("gemini http client: {err}")))?;
        Ok(Self {
            http,
            model: cfg.model.trim().to_string(),
            api_key: cfg.api_key.trim().to_string(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn stream(
        &self,
        bundle: &PromptBundle,
        on_text: impl FnMut(&str),
    ) -> Result<StreamSummary, QqsumError> {
        let body = request_body(bundle)?;
        let url = format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url, self.model
        );
        info!(model = %self.model, images = bundle.images.len(), chars = bundle.text.chars().count(), "sending prompt to gemini");

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .map_err(|err| QqsumError::Stream {
                message: format!("request failed: {err}"),
                usage: None,
            })?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(QqsumError::Stream {
                message: format!("http status {status}: {}", text.trim()),
                usage: None,
            });
        }
        debug!(%status, "gemini stream opened");

        consume_stream(SseChunks::new(BufReader::new(response)), on_text)
    }
}

/// One user turn: every image as inline data in prompt order, then the text.
pub fn request_body(bundle: &PromptBundle) -> Result<Value, QqsumError> {
    if bundle.text.is_empty() && bundle.images.is_empty() {
        return Err(QqsumError::configuration("nothing to send: prompt has no text and no images"));
    }

    let mut parts = Vec::with_capacity(bundle.images.len() + 1);
    for path in &bundle.images {
        let bytes = fs::read(path)
            .map_err(|err| QqsumError::Media(format!("failed to read {}: {err}", path.display())))?;
        parts.push(json!({
            "inlineData": {
                "mimeType": mime_type_for(path),
                "data": base64::engine::general_purpose::STANDARD.encode(bytes),
            }
        }));
    }
    parts.push(json!({ "text": bundle.text }));

    Ok(json!({
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": { "responseMimeType": "text/plain" },
    }))
}
