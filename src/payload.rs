//! Read-only accessors over the denormalized video payload.
//!
//! The record store treats payloads as opaque blobs. These helpers are the
//! only place that knows where the catalog API nests the fields the cache
//! itself cares about.

use serde_json::Value;

use crate::config::CatalogSettings;

/// Video payloads are stored exactly as the catalog API returned them, plus
/// the resolved `snippet.categoryName`.
pub type VideoPayload = Value;

pub const PROCESSED: &str = "processed";

fn str_at<'a>(payload: &'a Value, pointer: &str) -> Option<&'a str> {
    payload.pointer(pointer).and_then(Value::as_str)
}

pub fn video_id(payload: &Value) -> Option<&str> {
    str_at(payload, "/id")
}

pub fn channel_id(payload: &Value) -> Option<&str> {
    str_at(payload, "/snippet/channelId")
}

pub fn published_at(payload: &Value) -> Option<&str> {
    str_at(payload, "/snippet/publishedAt")
}

pub fn category_id(payload: &Value) -> Option<&str> {
    str_at(payload, "/snippet/categoryId")
}

pub fn category_name(payload: &Value) -> Option<&str> {
    str_at(payload, "/snippet/categoryName")
}

pub fn upload_status(payload: &Value) -> Option<&str> {
    str_at(payload, "/status/uploadStatus")
}

pub fn is_processed(payload: &Value) -> bool {
    upload_status(payload) == Some(PROCESSED)
}

pub fn title(payload: &Value) -> Option<&str> {
    str_at(payload, "/snippet/localized/title").or_else(|| str_at(payload, "/snippet/title"))
}

/// Writes the human readable category label next to the category id.
pub fn set_category_name(payload: &mut Value, name: &str) {
    if let Some(snippet) = payload.get_mut("snippet").and_then(Value::as_object_mut) {
        snippet.insert("categoryName".into(), Value::String(name.to_string()));
    }
}

/// High definition flag, honouring the quality setting.
pub fn is_hd(payload: &Value, settings: &CatalogSettings) -> bool {
    str_at(payload, "/contentDetails/definition") == Some("hd") && settings.hd_enabled()
}

/// Total seconds of an ISO-8601 duration such as `PT1H2M3S`.
pub fn duration_seconds(payload: &Value) -> Option<u64> {
    parse_duration(str_at(payload, "/contentDetails/duration")?)
}

fn parse_duration(raw: &str) -> Option<u64> {
    let mut total = 0u64;
    let mut digits = String::new();
    let mut seen = false;
    for ch in raw.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        if digits.is_empty() {
            continue;
        }
        let amount: u64 = digits.parse().ok()?;
        digits.clear();
        let unit = match ch {
            'D' => 86_400,
            'H' => 3_600,
            'M' => 60,
            'S' => 1,
            _ => continue,
        };
        total = total.checked_add(amount.checked_mul(unit)?)?;
        seen = true;
    }
    seen.then_some(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "id": "v1",
            "snippet": {
                "channelId": "UCone",
                "publishedAt": "2024-01-02T03:04:05Z",
                "categoryId": "10",
                "localized": {"title": "Hello"}
            },
            "status": {"uploadStatus": "processed"},
            "contentDetails": {"duration": "PT1H2M3S", "definition": "hd"}
        })
    }

    #[test]
    fn reads_nested_fields() {
        let payload = sample();
        assert_eq!(video_id(&payload), Some("v1"));
        assert_eq!(channel_id(&payload), Some("UCone"));
        assert_eq!(published_at(&payload), Some("2024-01-02T03:04:05Z"));
        assert_eq!(category_id(&payload), Some("10"));
        assert_eq!(title(&payload), Some("Hello"));
        assert!(is_processed(&payload));
    }

    #[test]
    fn missing_status_is_not_processed() {
        let payload = json!({"id": "v2", "status": {"uploadStatus": "uploaded"}});
        assert!(!is_processed(&payload));
        assert!(!is_processed(&json!({"id": "v3"})));
    }

    #[test]
    fn category_name_lands_in_snippet() {
        let mut payload = sample();
        set_category_name(&mut payload, "Music");
        assert_eq!(category_name(&payload), Some("Music"));
    }

    #[test]
    fn durations_are_summed() {
        assert_eq!(duration_seconds(&sample()), Some(3723));
        assert_eq!(parse_duration("PT45S"), Some(45));
        assert_eq!(parse_duration("P1DT1M"), Some(86_460));
        assert_eq!(parse_duration("P0D"), Some(0));
        assert_eq!(parse_duration("garbage"), None);
    }

    #[test]
    fn oversized_durations_are_rejected() {
        assert_eq!(parse_duration("PT99999999999999999H"), None);
        assert_eq!(parse_duration("P99999999999999999999D"), None);
        let payload = json!({"contentDetails": {"duration": "PT99999999999999999H"}});
        assert_eq!(duration_seconds(&payload), None);
    }
}
