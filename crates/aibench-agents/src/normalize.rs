//! Agent output normalization.
//!
//! Raw agent output comes in many shapes. Each extractor below either
//! recognizes the output and returns a structure, or returns `None` so the
//! next one in the list gets a turn.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use aibench_core::{AgentLog, AgentMessage, ExecutionResult, TokenUsage};
use regex::Regex;
use serde_json::Value;

/// Recovers conversation messages from raw output.
pub trait MessageStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn extract(&self, raw: &str) -> Option<Vec<AgentMessage>>;
}

/// Recovers token usage from raw output.
pub trait UsageStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn extract(&self, raw: &str) -> Option<TokenUsage>;
}

fn json_lines(raw: &str) -> impl Iterator<Item = Value> + '_ {
    raw.lines()
        .map(str::trim)
        .filter(|l| l.starts_with('{'))
        .filter_map(|l| serde_json::from_str::<Value>(l).ok())
}

fn content_text(content: &Value) -> Option<String> {
    match content {
        Value::String(s) => Some(s.clone()),
        // Block lists: [{"type": "text", "text": "..."}]
        Value::Array(blocks) => {
            let parts: Vec<&str> = blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect();
            (!parts.is_empty()).then(|| parts.join("\n"))
        }
        _ => None,
    }
}

fn message_from(value: &Value) -> Option<AgentMessage> {
    let value = value.get("message").unwrap_or(value);
    let role = value.get("role")?.as_str()?.to_string();
    let content = content_text(value.get("content")?)?;
    Some(AgentMessage { role, content })
}

/// One JSON object per line, each with `role` and `content` (optionally
/// wrapped in a `message` field).
pub struct JsonLinesMessages;

impl MessageStrategy for JsonLinesMessages {
    fn name(&self) -> &'static str {
        "json-lines"
    }

    fn extract(&self, raw: &str) -> Option<Vec<AgentMessage>> {
        let messages: Vec<AgentMessage> = json_lines(raw).filter_map(|v| message_from(&v)).collect();
        (!messages.is_empty()).then_some(messages)
    }
}

/// The whole output as a single assistant message.
pub struct PlainTextMessage;

impl MessageStrategy for PlainTextMessage {
    fn name(&self) -> &'static str {
        "plain-text"
    }

    fn extract(&self, raw: &str) -> Option<Vec<AgentMessage>> {
        let text = raw.trim();
        if text.is_empty() {
            return None;
        }
        Some(vec![AgentMessage {
            role: "assistant".to_string(),
            content: text.to_string(),
        }])
    }
}

fn usage_from(usage: &Value) -> Option<TokenUsage> {
    let field = |names: &[&str]| names.iter().find_map(|n| usage.get(*n)?.as_u64());
    let input = field(&["input_tokens", "prompt_tokens"]);
    let output = field(&["output_tokens", "completion_tokens"]);
    if input.is_none() && output.is_none() {
        return None;
    }
    Some(TokenUsage {
        input_tokens: input.unwrap_or(0),
        output_tokens: output.unwrap_or(0),
    })
}

/// Sum of every `usage` object found on JSON lines.
pub struct JsonUsage;

impl UsageStrategy for JsonUsage {
    fn name(&self) -> &'static str {
        "json-usage"
    }

    fn extract(&self, raw: &str) -> Option<TokenUsage> {
        json_lines(raw)
            .filter_map(|v| {
                let usage = v
                    .get("usage")
                    .or_else(|| v.get("message").and_then(|m| m.get("usage")))?;
                usage_from(usage)
            })
            .reduce(|acc, u| TokenUsage {
                input_tokens: acc.input_tokens + u.input_tokens,
                output_tokens: acc.output_tokens + u.output_tokens,
            })
    }
}

/// `input_tokens: N` / `output_tokens: N` in free text; the last mention wins.
pub struct TextUsage;

static INPUT_TOKENS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)input[_ ]tokens"?\s*[:=]\s*([\d,]+)"#).expect("input token pattern")
});
static OUTPUT_TOKENS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)output[_ ]tokens"?\s*[:=]\s*([\d,]+)"#).expect("output token pattern")
});

impl TextUsage {
    fn last_count(raw: &str, re: &Regex) -> Option<u64> {
        re.captures_iter(raw)
            .filter_map(|c| c.get(1)?.as_str().replace(',', "").parse().ok())
            .last()
    }
}

impl UsageStrategy for TextUsage {
    fn name(&self) -> &'static str {
        "text-usage"
    }

    fn extract(&self, raw: &str) -> Option<TokenUsage> {
        let input = Self::last_count(raw, &INPUT_TOKENS);
        let output = Self::last_count(raw, &OUTPUT_TOKENS);
        if input.is_none() && output.is_none() {
            return None;
        }
        Some(TokenUsage {
            input_tokens: input.unwrap_or(0),
            output_tokens: output.unwrap_or(0),
        })
    }
}

/// USD per thousand tokens.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Pricing {
    pub per_1k_input: Option<f64>,
    pub per_1k_output: Option<f64>,
}

impl Pricing {
    /// `None` when no price is configured.
    pub fn estimate(&self, usage: &TokenUsage) -> Option<f64> {
        if self.per_1k_input.is_none() && self.per_1k_output.is_none() {
            return None;
        }
        let input = self.per_1k_input.unwrap_or(0.0) * usage.input_tokens as f64 / 1000.0;
        let output = self.per_1k_output.unwrap_or(0.0) * usage.output_tokens as f64 / 1000.0;
        Some(input + output)
    }
}

/// Ordered extraction strategies.
pub struct LogNormalizer {
    messages: Vec<Box<dyn MessageStrategy>>,
    usage: Vec<Box<dyn UsageStrategy>>,
}

impl Default for LogNormalizer {
    fn default() -> Self {
        Self {
            messages: vec![Box::new(JsonLinesMessages), Box::new(PlainTextMessage)],
            usage: vec![Box::new(JsonUsage), Box::new(TextUsage)],
        }
    }
}

impl LogNormalizer {
    pub fn new(
        messages: Vec<Box<dyn MessageStrategy>>,
        usage: Vec<Box<dyn UsageStrategy>>,
    ) -> Self {
        Self { messages, usage }
    }

    pub fn messages(&self, raw: &str) -> Vec<AgentMessage> {
        self.messages
            .iter()
            .find_map(|s| {
                let found = s.extract(raw)?;
                tracing::trace!(strategy = s.name(), count = found.len(), "messages extracted");
                Some(found)
            })
            .unwrap_or_default()
    }

    pub fn usage(&self, raw: &str) -> Option<TokenUsage> {
        self.usage.iter().find_map(|s| s.extract(raw))
    }

    /// Build the normalized log for one execution.
    pub fn normalize(
        &self,
        agent_type: &str,
        raw: &str,
        result: &ExecutionResult,
        pricing: Pricing,
        environment: BTreeMap<String, String>,
    ) -> AgentLog {
        let token_usage = self.usage(raw);
        AgentLog {
            agent_type: agent_type.to_string(),
            status: result.status,
            messages: self.messages(raw),
            cost_estimate_usd: token_usage.as_ref().and_then(|u| pricing.estimate(u)),
            token_usage,
            environment,
            execution: result.clone(),
        }
    }
}

/// Host facts recorded with every agent log.
pub fn environment_snapshot(agent_type: &str) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert("os".to_string(), std::env::consts::OS.to_string());
    env.insert("arch".to_string(), std::env::consts::ARCH.to_string());
    env.insert("harness_version".to_string(), aibench_core::VERSION.to_string());
    env.insert("agent_type".to_string(), agent_type.to_string());
    env
}
