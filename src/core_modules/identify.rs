// THEORY:
// The `identify` module wraps the one genuinely unreliable collaborator in
// the system: an external vision model that is asked for structured data but
// answers in free-form text, over a network that sometimes fails. Everything
// here exists to turn that mess into a typed, total function.
//
// Key architectural principles:
// 1.  **Bounded retry, fail-loud inside**: the HTTP call is retried a fixed
//     number of times with exponential backoff. The last failure propagates
//     out of the retry loop instead of being swallowed, so the boundary above
//     it can see what actually went wrong.
// 2.  **Tolerant normalization chain**: responses are run through fence
//     stripping, a direct JSON parse, and a bracket-delimited substring
//     rescue, in that order. A lone object is promoted to a one-element
//     array. Downstream code never sees a raw string.
// 3.  **Tagged outcome, never an exception**: the public contract is
//     `identify() -> Identification`, a total function. Structured findings,
//     an unparseable-text echo, and a post-retry failure are distinct
//     variants, so "no findings" is never conflated with "parse failure" or
//     "call failed". Every variant carries at least one finding, which is
//     what upholds the one-tile-to-one-row floor in the output table.
//
// Website fields always pass through the defanging transform. That is an
// invariant of the output format (spreadsheets love to auto-link), not a
// security control.

use std::path::Path;
use std::time::Duration;

use base64::Engine;
use serde_json::Value;

use crate::error::{Result, ScoutError};

/// Instruction sent alongside every tile.
pub const DEFAULT_PROMPT: &str = "Identify all distinct stickers or logos in this image. \
     Return a JSON array. Each element must be an object with keys: \
     name, category, confidence (0 to 1), notes, website. \
     Use official site when known. Keep notes concise.";

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Longest raw-text echo carried by a freeform finding.
const FREEFORM_ECHO_CHARS: usize = 120;

/// One identified object or label for a tile.
#[derive(Debug, Clone, PartialEq)]
pub struct Finding {
    pub name: String,
    pub category: String,
    pub notes: String,
    /// Opaque scalar in [0, 1]; `None` when the model omitted it or sent junk.
    pub confidence: Option<f64>,
    /// Always stored defanged.
    pub website: String,
}

impl Finding {
    /// Placeholder finding carrying an error description, used when the
    /// external call failed for good.
    pub fn error(notes: String) -> Self {
        Self {
            name: String::new(),
            category: String::new(),
            notes,
            confidence: None,
            website: String::new(),
        }
    }
}

/// Outcome of identifying one tile. Every variant yields at least one
/// finding.
#[derive(Debug, Clone, PartialEq)]
pub enum Identification {
    /// The response parsed into structured findings.
    Findings(Vec<Finding>),
    /// The response resisted parsing; a truncated echo of the raw text is
    /// carried in `name` with `notes = "freeform"`.
    Freeform(Finding),
    /// Retries were exhausted (or the tile could not be read); the error
    /// description is carried in `notes`.
    Failed(Finding),
}

impl Identification {
    pub fn findings(&self) -> &[Finding] {
        match self {
            Self::Findings(findings) => findings,
            Self::Freeform(finding) | Self::Failed(finding) => std::slice::from_ref(finding),
        }
    }

    /// Short tag for log lines.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Findings(_) => "structured",
            Self::Freeform(_) => "freeform",
            Self::Failed(_) => "failed",
        }
    }
}

/// Anything that can identify a tile image. The production implementation is
/// [`VisionClient`]; tests substitute stubs.
#[allow(async_fn_in_trait)]
pub trait Identifier {
    /// Total function: per-tile failures are folded into
    /// [`Identification::Failed`], never raised.
    async fn identify(&self, tile: &Path) -> Identification;
}

/// Retry behavior for the external call.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the initial one).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Maximum delay between retries (backoff is capped here).
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Backoff before retrying after the given 1-based failed attempt: the base
/// delay doubles per attempt, capped at `max_delay`.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let doublings = attempt.saturating_sub(1).min(16);
    config
        .base_delay
        .saturating_mul(1u32 << doublings)
        .min(config.max_delay)
}

/// HTTP client for an OpenAI-compatible vision chat-completions endpoint.
pub struct VisionClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    prompt: String,
    retry: RetryConfig,
}

impl VisionClient {
    /// Builds a client from the environment. The credential check happens
    /// here, once, before any tile is processed; a missing key is a fatal
    /// configuration error.
    pub fn from_env(model: String, prompt: String) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| ScoutError::MissingApiKey)?;
        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Ok(Self {
            http: reqwest::Client::builder()
                .user_agent(concat!("sticker_scout/", env!("CARGO_PKG_VERSION")))
                .timeout(Duration::from_secs(120))
                .build()
                .expect("reqwest client should build"),
            base_url,
            api_key,
            model,
            prompt,
            retry: RetryConfig::default(),
        })
    }

    async fn request_once(&self, image_b64: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": self.prompt },
                    { "type": "image_url",
                      "image_url": { "url": format!("data:image/jpeg;base64,{image_b64}") } },
                ],
            }],
            "temperature": 0.1,
        });

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let resp = check_response(resp).await?;

        let payload: Value = resp.json().await?;
        Ok(payload["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .trim()
            .to_string())
    }

    async fn call_with_retry(&self, image_b64: &str) -> Result<String> {
        let mut attempt = 1;
        loop {
            match self.request_once(image_b64).await {
                Ok(text) => return Ok(text),
                Err(error) if attempt < self.retry.max_attempts => {
                    let wait = backoff_delay(&self.retry, attempt);
                    tracing::warn!(attempt, error = %error, wait_secs = wait.as_secs(), "identification call failed; backing off");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn try_identify(&self, tile: &Path) -> Result<Identification> {
        let bytes = tokio::fs::read(tile).await?;
        let image_b64 = base64::engine::general_purpose::STANDARD.encode(bytes);
        let text = self.call_with_retry(&image_b64).await?;
        Ok(normalize_response(&text))
    }
}

impl Identifier for VisionClient {
    async fn identify(&self, tile: &Path) -> Identification {
        match self.try_identify(tile).await {
            Ok(identification) => identification,
            Err(error) => Identification::Failed(Finding::error(format!("error:{error}"))),
        }
    }
}

async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response> {
    if !resp.status().is_success() {
        return Err(ScoutError::Api {
            status: resp.status().as_u16(),
            message: resp.text().await.unwrap_or_default(),
        });
    }
    Ok(resp)
}

/// Normalizes raw response text into an identification outcome. When the
/// parse chain yields nothing, the text itself (possibly empty) is echoed as
/// a freeform finding so the per-tile finding floor holds on every path.
pub fn normalize_response(raw: &str) -> Identification {
    let findings = parse_findings(raw);
    if !findings.is_empty() {
        return Identification::Findings(findings);
    }
    Identification::Freeform(Finding {
        name: truncate_chars(raw.trim(), FREEFORM_ECHO_CHARS),
        category: String::new(),
        notes: "freeform".to_string(),
        confidence: None,
        website: String::new(),
    })
}

/// Parse chain: fence strip, direct parse, bracket-delimited substring
/// rescue. Yields an empty vec when nothing structured can be recovered.
fn parse_findings(raw: &str) -> Vec<Finding> {
    let text = strip_code_fence(raw);
    let value = match serde_json::from_str::<Value>(&text) {
        Ok(value) => value,
        Err(_) => {
            let Some(blob) = extract_json_blob(&text) else {
                return Vec::new();
            };
            match serde_json::from_str::<Value>(blob) {
                Ok(value) => value,
                Err(_) => return Vec::new(),
            }
        }
    };

    let items = match value {
        Value::Array(items) => items,
        object @ Value::Object(_) => vec![object],
        _ => return Vec::new(),
    };

    items
        .iter()
        .filter_map(Value::as_object)
        .map(|item| Finding {
            name: string_field(item, "name"),
            category: string_field(item, "category"),
            notes: string_field(item, "notes"),
            confidence: confidence_field(item.get("confidence")),
            website: defang_url(&string_field(item, "website")),
        })
        .collect()
}

/// Removes a surrounding Markdown code fence, with or without a language tag.
fn strip_code_fence(raw: &str) -> String {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    let rest = rest.trim_start();
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim().to_string()
}

/// Finds the first bracket-delimited array-or-object substring: from the
/// earliest opening bracket to the matching last closing bracket, arrays
/// preferred when they start first.
fn extract_json_blob(text: &str) -> Option<&str> {
    let array = delimited_span(text, '[', ']');
    let object = delimited_span(text, '{', '}');
    match (array, object) {
        (Some(a), Some(o)) => Some(if a.0 <= o.0 { &text[a.0..a.1] } else { &text[o.0..o.1] }),
        (Some(a), None) => Some(&text[a.0..a.1]),
        (None, Some(o)) => Some(&text[o.0..o.1]),
        (None, None) => None,
    }
}

fn delimited_span(text: &str, open: char, close: char) -> Option<(usize, usize)> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then_some((start, end + close.len_utf8()))
}

fn string_field(item: &serde_json::Map<String, Value>, key: &str) -> String {
    match item.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string().trim().to_string(),
    }
}

/// Accepts JSON numbers and numeric strings; anything else is unknown.
fn confidence_field(value: Option<&Value>) -> Option<f64> {
    match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Textual substitution of scheme and dots so spreadsheet tools never
/// auto-link stored URLs.
pub fn defang_url(url: &str) -> String {
    if url.is_empty() {
        return String::new();
    }
    url.replace("http://", "hxxp://")
        .replace("https://", "hxxps://")
        .replace('.', "[.]")
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json_array() {
        let raw = r#"[{"name":"Acme","category":"brand","confidence":0.9,"notes":"","website":"https://acme.com"}]"#;
        let Identification::Findings(findings) = normalize_response(raw) else {
            panic!("expected structured findings");
        };
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].name, "Acme");
        assert_eq!(findings[0].category, "brand");
        assert_eq!(findings[0].confidence, Some(0.9));
        assert_eq!(findings[0].website, "hxxps://acme[.]com");
    }

    #[test]
    fn strips_code_fence_with_language_tag() {
        let raw = "```json\n[{\"name\":\"Octo\"}]\n```";
        let Identification::Findings(findings) = normalize_response(raw) else {
            panic!("expected structured findings");
        };
        assert_eq!(findings[0].name, "Octo");
        assert_eq!(findings[0].category, "");
        assert_eq!(findings[0].confidence, None);
    }

    #[test]
    fn promotes_single_object_to_one_finding() {
        let raw = r#"{"name":"Lone","category":"logo"}"#;
        let Identification::Findings(findings) = normalize_response(raw) else {
            panic!("expected structured findings");
        };
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].name, "Lone");
    }

    #[test]
    fn rescues_array_embedded_in_prose() {
        let raw = "Here is what I found:\n[{\"name\":\"Buried\"}]\nHope that helps!";
        let Identification::Findings(findings) = normalize_response(raw) else {
            panic!("expected structured findings");
        };
        assert_eq!(findings[0].name, "Buried");
    }

    #[test]
    fn skips_non_object_array_elements() {
        let raw = r#"[{"name":"Kept"}, "stray string", 42]"#;
        let Identification::Findings(findings) = normalize_response(raw) else {
            panic!("expected structured findings");
        };
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].name, "Kept");
    }

    #[test]
    fn unparseable_text_becomes_freeform_echo() {
        let raw = "I see two skateboard stickers and a coffee shop logo.";
        let Identification::Freeform(finding) = normalize_response(raw) else {
            panic!("expected freeform");
        };
        assert_eq!(finding.name, raw);
        assert_eq!(finding.notes, "freeform");
        assert_eq!(finding.website, "");
    }

    #[test]
    fn freeform_echo_is_truncated_to_120_chars() {
        let raw = "x".repeat(400);
        let Identification::Freeform(finding) = normalize_response(&raw) else {
            panic!("expected freeform");
        };
        assert_eq!(finding.name.chars().count(), 120);
    }

    #[test]
    fn empty_response_still_yields_one_finding() {
        let identification = normalize_response("");
        assert_eq!(identification.findings().len(), 1);
        assert_eq!(identification.label(), "freeform");
    }

    #[test]
    fn confidence_accepts_numeric_strings_and_rejects_junk() {
        let raw = r#"[{"name":"A","confidence":"0.75"},{"name":"B","confidence":"high"},{"name":"C"}]"#;
        let Identification::Findings(findings) = normalize_response(raw) else {
            panic!("expected structured findings");
        };
        assert_eq!(findings[0].confidence, Some(0.75));
        assert_eq!(findings[1].confidence, None);
        assert_eq!(findings[2].confidence, None);
    }

    #[test]
    fn defangs_both_schemes_and_dots() {
        assert_eq!(defang_url("https://acme.com"), "hxxps://acme[.]com");
        assert_eq!(defang_url("http://sub.acme.com/x"), "hxxp://sub[.]acme[.]com/x");
        assert_eq!(defang_url(""), "");
    }

    #[test]
    fn object_preferred_when_it_starts_before_array() {
        let raw = "{\"name\":\"First\"} trailing [1, 2]";
        assert_eq!(extract_json_blob(raw), Some("{\"name\":\"First\"}"));
        let Identification::Findings(findings) = normalize_response(raw) else {
            panic!("expected structured findings");
        };
        assert_eq!(findings[0].name, "First");
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let config = RetryConfig::default();
        assert_eq!(backoff_delay(&config, 1), Duration::from_secs(1));
        assert_eq!(backoff_delay(&config, 2), Duration::from_secs(2));
        assert_eq!(backoff_delay(&config, 3), Duration::from_secs(4));
        assert_eq!(backoff_delay(&config, 4), Duration::from_secs(8));
        assert_eq!(backoff_delay(&config, 10), Duration::from_secs(30));
    }

    #[test]
    fn failed_outcome_carries_error_note_only() {
        let identification = Identification::Failed(Finding::error("error:boom".into()));
        let findings = identification.findings();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].name, "");
        assert_eq!(findings[0].category, "");
        assert_eq!(findings[0].website, "");
        assert!(findings[0].notes.contains("error"));
        assert_eq!(identification.label(), "failed");
    }
}
