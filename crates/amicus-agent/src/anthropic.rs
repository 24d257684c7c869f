//! [`AnthropicBackend`] — the one `LLMBackend` implementation this crate
//! ships, talking to the Messages API directly over HTTP. Handles the
//! tool-call step loop itself (§4.H.5), since Anthropic's API is a single
//! request/response per step rather than a server-side agent loop.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::{
    BackendError, BackendRole, CircuitBreaker, CompleteRequest, CompleteResponse, LLMBackend,
    ObjectRequest, ObjectResponse, ToolExecutor, ToolStep, Usage,
};

const API_VERSION: &str = "2023-06-01";
const OAUTH_BETA: &str = "oauth-2025-04-20";
const OAUTH_TOKEN_PREFIX: &str = "sk-ant-oat01-";
const MAX_RETRIES: u32 = 3;

/// Substrings the Anthropic API is known to use in 400 bodies when a request
/// overflows the model's context window — there is no dedicated error code,
/// only prose (§4.H.6).
const CONTEXT_OVERFLOW_MARKERS: &[&str] = &["prompt is too long", "maximum context length"];

pub struct AnthropicBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    is_oauth: bool,
    default_model: String,
    fast_model: String,
    breaker: CircuitBreaker,
}

impl AnthropicBackend {
    pub fn new(api_key: String, base_url: Option<String>, default_model: String, fast_model: String) -> Self {
        let is_oauth = api_key.starts_with(OAUTH_TOKEN_PREFIX);
        Self {
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            is_oauth,
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".to_string()),
            default_model,
            fast_model,
            breaker: CircuitBreaker::default(),
        }
    }

    fn apply_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.is_oauth {
            builder
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("anthropic-beta", OAUTH_BETA)
        } else {
            builder.header("x-api-key", &self.api_key)
        }
    }

    /// Routes `role:"default"` to the fast model while the breaker is open
    /// (§4.H.7); `role:"fast"` always uses the fast model.
    fn model_for(&self, role: BackendRole, now_ms: u64) -> &str {
        match role {
            BackendRole::Fast => &self.fast_model,
            BackendRole::Default if self.breaker.is_open(now_ms) => &self.fast_model,
            BackendRole::Default => &self.default_model,
        }
    }

    async fn post(&self, body: &serde_json::Value) -> Result<ApiResponse, BackendError> {
        let url = format!("{}/v1/messages", self.base_url);
        let builder = self
            .client
            .post(&url)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(body);

        let resp = self
            .apply_auth(builder)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry_after_ms = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok().map(|s| s * 1000))
                .unwrap_or(5000);
            return Err(BackendError::Transient(format!(
                "rate limited, retry after {retry_after_ms}ms"
            )));
        }

        if status == 529 || status == 503 {
            return Err(BackendError::ModelUnavailable(format!("status {status}")));
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Anthropic API error");
            if CONTEXT_OVERFLOW_MARKERS.iter().any(|m| text.contains(m)) {
                return Err(BackendError::ContextOverflow);
            }
            if status >= 500 {
                return Err(BackendError::Transient(format!("status {status}: {text}")));
            }
            return Err(BackendError::ModelUnavailable(format!("status {status}: {text}")));
        }

        resp.json()
            .await
            .map_err(|e| BackendError::Transient(format!("parse error: {e}")))
    }

    /// One request/response round with retry+backoff (§4.H.6): delay is
    /// `min(1000*2^attempt, 30000) + jitter(0..250)ms`.
    async fn post_with_retry(
        &self,
        body: &serde_json::Value,
        signal: &CancellationToken,
    ) -> Result<ApiResponse, BackendError> {
        let mut attempt = 0u32;
        loop {
            if signal.is_cancelled() {
                return Err(BackendError::Aborted);
            }
            match self.post(body).await {
                Ok(resp) => {
                    self.breaker.record_success();
                    return Ok(resp);
                }
                Err(BackendError::Transient(msg)) if attempt < MAX_RETRIES => {
                    self.breaker.record_failure(now_ms());
                    let delay = backoff_delay_ms(attempt);
                    debug!(attempt, delay_ms = delay, %msg, "retrying backend call");
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
                        _ = signal.cancelled() => return Err(BackendError::Aborted),
                    }
                    attempt += 1;
                }
                Err(e @ BackendError::Transient(_)) => {
                    self.breaker.record_failure(now_ms());
                    return Err(e);
                }
                Err(e @ BackendError::ModelUnavailable(_)) => {
                    self.breaker.record_failure(now_ms());
                    return Err(e);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

fn backoff_delay_ms(attempt: u32) -> u64 {
    let base = 1000u64.saturating_mul(1u64 << attempt.min(20)).min(30_000);
    let jitter = rand::thread_rng().gen_range(0..250);
    base + jitter
}

fn classify_transport_error(e: &reqwest::Error) -> BackendError {
    if e.is_timeout() && e.is_connect() {
        BackendError::FirstByteTimeout
    } else if e.is_timeout() {
        BackendError::FirstByteTimeout
    } else {
        BackendError::Transient(e.to_string())
    }
}

fn tools_to_json(tools: &[crate::backend::ToolSpec]) -> Vec<serde_json::Value> {
    tools
        .iter()
        .map(|t| {
            serde_json::json!({
                "name": t.name,
                "description": t.description,
                "input_schema": t.input_schema,
            })
        })
        .collect()
}

#[async_trait]
impl LLMBackend for AnthropicBackend {
    async fn complete(
        &self,
        req: CompleteRequest,
        tools: Option<&dyn ToolExecutor>,
        signal: &CancellationToken,
    ) -> Result<CompleteResponse, BackendError> {
        let model = self.model_for(req.role, now_ms()).to_string();
        let mut raw_messages: Vec<serde_json::Value> = req
            .messages
            .iter()
            .map(|m| serde_json::json!({ "role": m.role, "content": m.content }))
            .collect();

        let mut steps: Vec<ToolStep> = Vec::new();
        let mut total_usage = Usage::default();
        let mut last: Option<ApiResponse> = None;

        for step_idx in 0..req.max_steps.max(1) {
            if signal.is_cancelled() {
                return Err(BackendError::Aborted);
            }

            let mut body = serde_json::json!({
                "model": model,
                "max_tokens": req.max_tokens,
                "system": req.system,
                "messages": raw_messages,
                "stream": false,
            });
            if !req.tools.is_empty() {
                body["tools"] = serde_json::Value::Array(tools_to_json(&req.tools));
            }

            let resp = self.post_with_retry(&body, signal).await?;
            total_usage.input_tokens += resp.usage.input_tokens;
            total_usage.output_tokens += resp.usage.output_tokens;

            let (text, tool_calls) = split_content(&resp.content);
            let stop_reason = resp.stop_reason.clone().unwrap_or_default();

            if tool_calls.is_empty() || stop_reason != "tool_use" || tools.is_none() {
                last = Some(resp);
                break;
            }
            let executor = tools.expect("checked above");

            let mut assistant_content: Vec<serde_json::Value> = Vec::new();
            if !text.is_empty() {
                assistant_content.push(serde_json::json!({ "type": "text", "text": text }));
            }
            for call in &tool_calls {
                assistant_content.push(serde_json::json!({
                    "type": "tool_use",
                    "id": call.id,
                    "name": call.name,
                    "input": call.input,
                }));
            }
            raw_messages.push(serde_json::json!({ "role": "assistant", "content": assistant_content }));

            let mut tool_result_content: Vec<serde_json::Value> = Vec::new();
            for call in &tool_calls {
                let (output, is_error) = executor
                    .execute(&call.name, call.input.clone(), Duration::from_secs(60), signal)
                    .await;
                let wrapped = wrap_tool_output(&call.name, &output);
                tool_result_content.push(serde_json::json!({
                    "type": "tool_result",
                    "tool_use_id": call.id,
                    "content": wrapped,
                    "is_error": is_error,
                }));
                steps.push(ToolStep {
                    tool_name: call.name.clone(),
                    input: call.input.clone(),
                    output,
                    is_error,
                });
            }
            raw_messages.push(serde_json::json!({ "role": "user", "content": tool_result_content }));

            last = Some(resp);
            if step_idx + 1 == req.max_steps {
                break;
            }
        }

        let resp = last.ok_or_else(|| BackendError::Transient("no response received".into()))?;
        let (text, _) = split_content(&resp.content);
        Ok(CompleteResponse {
            text,
            steps,
            model_id: resp.model,
            usage: total_usage,
            stop_reason: resp.stop_reason.unwrap_or_default(),
        })
    }

    /// Implements structured output via a synthetic forced tool call: the
    /// schema becomes a single tool's `input_schema`, `tool_choice` forces
    /// the model to call it, and the tool's `input` is the decoded object.
    async fn complete_object(&self, req: ObjectRequest) -> Result<ObjectResponse, BackendError> {
        let signal = CancellationToken::new();
        let model = self.model_for(req.role, now_ms()).to_string();
        let messages: Vec<serde_json::Value> = req
            .messages
            .iter()
            .map(|m| serde_json::json!({ "role": m.role, "content": m.content }))
            .collect();

        let body = serde_json::json!({
            "model": model,
            "max_tokens": 1024,
            "system": req.system,
            "messages": messages,
            "stream": false,
            "tools": [{
                "name": req.schema_name,
                "description": "Emit the requested structured result.",
                "input_schema": req.schema,
            }],
            "tool_choice": { "type": "tool", "name": req.schema_name },
        });

        let resp = self.post_with_retry(&body, &signal).await?;
        let (_, tool_calls) = split_content(&resp.content);
        let call = tool_calls
            .into_iter()
            .find(|c| c.name == req.schema_name)
            .ok_or_else(|| BackendError::Transient("model did not emit the forced tool call".into()))?;

        Ok(ObjectResponse {
            output: call.input,
            model_id: resp.model,
        })
    }
}

struct ParsedToolCall {
    id: String,
    name: String,
    input: serde_json::Value,
}

fn split_content(content: &[ContentBlock]) -> (String, Vec<ParsedToolCall>) {
    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();
    for block in content {
        match block {
            ContentBlock::Text { text } => text_parts.push(text.clone()),
            ContentBlock::ToolUse { id, name, input } => tool_calls.push(ParsedToolCall {
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            }),
            ContentBlock::Unknown => {}
        }
    }
    (text_parts.join(""), tool_calls)
}

/// Wrap tool output in `<tool_output name="...">...</tool_output>`, escaping
/// any literal closing tag in the payload (§4.H.5).
fn wrap_tool_output(tool_name: &str, content: &str) -> String {
    let escaped = content.replace("</tool_output>", "&lt;/tool_output&gt;");
    format!("<tool_output name=\"{tool_name}\">{escaped}</tool_output>")
}

#[derive(Deserialize)]
struct ApiResponse {
    model: String,
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: ApiUsage,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
struct ApiUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_tool_output_escapes_embedded_close_tag() {
        let wrapped = wrap_tool_output("memory_search", "see </tool_output> here");
        assert_eq!(
            wrapped,
            "<tool_output name=\"memory_search\">see &lt;/tool_output&gt; here</tool_output>"
        );
    }

    #[test]
    fn backoff_delay_caps_at_30s_plus_jitter() {
        let d = backoff_delay_ms(10);
        assert!(d >= 30_000 && d < 30_250);
    }

    #[test]
    fn backoff_delay_grows_exponentially_for_small_attempts() {
        assert!(backoff_delay_ms(0) < backoff_delay_ms(1));
        assert!(backoff_delay_ms(1) < backoff_delay_ms(2));
    }
}
