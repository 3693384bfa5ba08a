use chrono::{DateTime, Utc};
use reqwest::Url;
use serde_json::Value;

pub fn parse_env_bool(raw: Option<&str>) -> bool {
    matches!(
        raw.map(|value| value.trim().to_ascii_lowercase()),
        Some(value) if matches!(value.as_str(), "1" | "true" | "yes" | "on")
    )
}

pub fn parse_llm_endpoint(raw: &str, label: &str) -> std::result::Result<Url, String> {
    let url = Url::parse(raw.trim()).map_err(|err| format!("invalid {label}: {err}"))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(format!("unsupported {label} scheme: {other}")),
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(format!("{label} must not include credentials"));
    }
    if url.host_str().is_none() {
        return Err(format!("{label} host is missing"));
    }
    Ok(url)
}

pub fn extract_llm_content(value: &Value) -> Option<String> {
    if let Some(content) = value
        .get("message")
        .and_then(|message| message.get("content"))
        .and_then(|content| content.as_str())
    {
        return Some(content.to_string());
    }
    if let Some(content) = value
        .get("choices")
        .and_then(|choices| choices.as_array())
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(|content| content.as_str())
    {
        return Some(content.to_string());
    }
    if let Some(content) = value.get("response").and_then(|response| response.as_str()) {
        return Some(content.to_string());
    }
    None
}

pub fn extract_llm_finish_reason(value: &Value) -> Option<String> {
    value
        .get("choices")
        .and_then(|choices| choices.as_array())
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("finish_reason"))
        .or_else(|| value.get("done_reason"))
        .and_then(Value::as_str)
        .map(|reason| reason.trim().to_ascii_lowercase())
}

pub fn parse_u32_value(value: &Value) -> Option<u32> {
    if let Some(raw) = value.as_u64() {
        return Some(saturating_u64_to_u32(raw));
    }
    if let Some(raw) = value.as_i64() {
        if raw <= 0 {
            return Some(0);
        }
        return Some(u32::try_from(raw).unwrap_or(u32::MAX));
    }
    if let Some(raw) = value.as_f64()
        && raw.is_finite()
    {
        return Some(rounded_f64_to_u32_clamped(raw));
    }
    None
}

/// `Retry-After` accepts delta-seconds or an HTTP date.
pub fn parse_retry_after_ms(raw: &str, now: DateTime<Utc>) -> Option<u64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(seconds) = raw.parse::<f64>() {
        if !seconds.is_finite() || seconds < 0.0 {
            return None;
        }
        return Some(rounded_f64_to_u64_clamped(seconds * 1000.0));
    }
    let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let delta = at.signed_duration_since(now).num_milliseconds();
    Some(u64::try_from(delta).unwrap_or(0))
}

pub fn estimate_text_tokens(text: &str) -> u32 {
    let chars = u32::try_from(text.chars().count()).unwrap_or(u32::MAX);
    if chars == 0 {
        return 0;
    }
    chars.div_ceil(4)
}

fn saturating_u64_to_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

fn rounded_f64_to_u32_clamped(value: f64) -> u32 {
    let rounded = value.round().clamp(0.0, f64::from(u32::MAX));
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "value is pre-clamped to the representable non-negative u32 range"
    )]
    {
        rounded as u32
    }
}

fn rounded_f64_to_u64_clamped(value: f64) -> u64 {
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss,
        reason = "value is clamped to the non-negative u64 range before the cast"
    )]
    {
        value.round().clamp(0.0, u64::MAX as f64) as u64
    }
}
