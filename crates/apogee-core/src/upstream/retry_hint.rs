//! Extraction of the upstream's own retry hint from 429 error bodies.
//!
//! Google error payloads carry a `RetryInfo` detail whose `retryDelay` is
//! a duration string like `"30s"` or `"1.5s"`. The hint only feeds the
//! `Retry-After` surface and log lines; the cooldown schedule itself is
//! the exponential policy in the pool.

/// Parse the first `retryDelay` duration out of an error body, rounded up
/// to whole seconds.
pub fn parse_retry_delay_secs(body: &str) -> Option<u64> {
    let key_pos = body.find("\"retryDelay\"")?;
    let rest = &body[key_pos + "\"retryDelay\"".len()..];
    let colon = rest.find(':')?;
    let rest = rest[colon + 1..].trim_start();
    let rest = rest.strip_prefix('"')?;
    let end = rest.find('"')?;
    let value = &rest[..end];

    let digits = value.strip_suffix('s')?;
    let secs: f64 = digits.parse().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Some(secs.ceil() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_whole_and_fractional_durations() {
        assert_eq!(parse_retry_delay_secs(r#"{"retryDelay": "30s"}"#), Some(30));
        assert_eq!(parse_retry_delay_secs(r#"{"retryDelay":"1.2s"}"#), Some(2));
        assert_eq!(parse_retry_delay_secs(r#"{"retryDelay": "0s"}"#), Some(0));
    }

    #[test]
    fn tolerates_missing_or_malformed_hints() {
        assert_eq!(parse_retry_delay_secs("{}"), None);
        assert_eq!(parse_retry_delay_secs(r#"{"retryDelay": 30}"#), None);
        assert_eq!(parse_retry_delay_secs(r#"{"retryDelay": "soon"}"#), None);
    }

    #[test]
    fn finds_hint_nested_in_error_details() {
        let body = r#"{"error":{"code":429,"details":[
            {"@type":"type.googleapis.com/google.rpc.RetryInfo","retryDelay":"7s"}
        ]}}"#;
        assert_eq!(parse_retry_delay_secs(body), Some(7));
    }
}
