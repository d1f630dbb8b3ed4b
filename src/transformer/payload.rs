//! Payload classification
//!
//! Every MQTT payload is interpreted exactly once per message, before any
//! rule runs. Classification never fails: bytes that are neither a number
//! nor a JSON object end up as text.

use serde_json::{Map, Value};

/// Parse a decimal number, rejecting input outside the `f64` range
///
/// `"1e400"` is not a number. Spelled-out `inf`, `infinity` and `nan`
/// (any case, optional sign) still are.
pub(crate) fn parse_number(text: &str) -> Option<f64> {
    let n = text.parse::<f64>().ok()?;
    if n.is_finite() {
        return Some(n);
    }

    let unsigned = text.strip_prefix(|c: char| c == '+' || c == '-').unwrap_or(text);
    ["inf", "infinity", "nan"]
        .iter()
        .any(|literal| unsigned.eq_ignore_ascii_case(literal))
        .then_some(n)
}

/// A message payload after classification
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifiedPayload {
    /// The whole payload is a decimal floating-point number
    Number(f64),
    /// The payload is a JSON object
    Structured(Map<String, Value>),
    /// Anything else, decoded as (lossy) UTF-8
    Text(String),
}

impl ClassifiedPayload {
    /// Classify raw payload bytes
    ///
    /// Order matters: `"23.5"` is a number even though it is also valid JSON.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use mqtt_exporter::transformer::ClassifiedPayload;
    ///
    /// assert_eq!(ClassifiedPayload::classify(b"23.5"), ClassifiedPayload::Number(23.5));
    /// ```
    pub fn classify(bytes: &[u8]) -> Self {
        let text = String::from_utf8_lossy(bytes);

        if let Some(n) = parse_number(&text) {
            return ClassifiedPayload::Number(n);
        }

        if let Ok(map) = serde_json::from_slice::<Map<String, Value>>(bytes) {
            return ClassifiedPayload::Structured(map);
        }

        ClassifiedPayload::Text(text.into_owned())
    }

    /// Numeric value, only for the `Number` variant
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ClassifiedPayload::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Short name of the variant, used in log fields
    pub fn kind(&self) -> &'static str {
        match self {
            ClassifiedPayload::Number(_) => "number",
            ClassifiedPayload::Structured(_) => "structured",
            ClassifiedPayload::Text(_) => "text",
        }
    }
}

/// Data visible to templates while evaluating one rule against one message
///
/// Built fresh for every (message, rule) pair and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct RenderContext<'a> {
    /// The classified message payload
    pub payload: &'a ClassifiedPayload,
    /// Capture groups of the rule's topic pattern, in group order
    ///
    /// The whole match (group 0) is not included. Optional groups that did
    /// not participate in the match are empty strings.
    pub captures: Vec<String>,
}

impl<'a> RenderContext<'a> {
    /// Create a context without captures
    pub fn new(payload: &'a ClassifiedPayload) -> Self {
        Self {
            payload,
            captures: Vec::new(),
        }
    }

    /// Create a context from a regex match
    pub fn from_captures(payload: &'a ClassifiedPayload, caps: &regex::Captures<'_>) -> Self {
        let captures = caps
            .iter()
            .skip(1)
            .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
            .collect();

        Self { payload, captures }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;
    use serde_json::json;

    #[test]
    fn test_classify_number() {
        assert_eq!(
            ClassifiedPayload::classify(b"23.5"),
            ClassifiedPayload::Number(23.5)
        );
        assert_eq!(
            ClassifiedPayload::classify(b"-4"),
            ClassifiedPayload::Number(-4.0)
        );
        assert_eq!(
            ClassifiedPayload::classify(b"1e3"),
            ClassifiedPayload::Number(1000.0)
        );
    }

    #[test]
    fn test_out_of_range_number_is_text() {
        assert_eq!(
            ClassifiedPayload::classify(b"1e400"),
            ClassifiedPayload::Text("1e400".to_string())
        );
        assert_eq!(
            ClassifiedPayload::classify(b"-1e400"),
            ClassifiedPayload::Text("-1e400".to_string())
        );
    }

    #[test]
    fn test_spelled_out_special_values() {
        assert_eq!(
            ClassifiedPayload::classify(b"+Inf"),
            ClassifiedPayload::Number(f64::INFINITY)
        );
        assert_eq!(
            ClassifiedPayload::classify(b"-infinity"),
            ClassifiedPayload::Number(f64::NEG_INFINITY)
        );
        assert!(ClassifiedPayload::classify(b"NaN")
            .as_number()
            .is_some_and(f64::is_nan));
        assert_eq!(parse_number("1.7976931348623157e308"), Some(f64::MAX));
        assert_eq!(parse_number("infinite"), None);
    }

    #[test]
    fn test_classify_structured() {
        let payload = ClassifiedPayload::classify(br#"{"temp":23.5}"#);
        let expected = json!({"temp": 23.5});
        assert_eq!(
            payload,
            ClassifiedPayload::Structured(expected.as_object().unwrap().clone())
        );
    }

    #[test]
    fn test_classify_text() {
        assert_eq!(
            ClassifiedPayload::classify(b"on"),
            ClassifiedPayload::Text("on".to_string())
        );
    }

    #[test]
    fn test_classify_whitespace_is_not_a_number() {
        // Surrounding whitespace disqualifies the number path, and " 1 " is
        // not a JSON object either.
        assert_eq!(
            ClassifiedPayload::classify(b" 1 "),
            ClassifiedPayload::Text(" 1 ".to_string())
        );
    }

    #[test]
    fn test_classify_json_array_is_text() {
        assert_eq!(
            ClassifiedPayload::classify(b"[1,2]"),
            ClassifiedPayload::Text("[1,2]".to_string())
        );
    }

    #[test]
    fn test_classify_invalid_utf8() {
        let payload = ClassifiedPayload::classify(&[0xff, 0xfe, b'a']);
        assert_eq!(payload.kind(), "text");
    }

    #[test]
    fn test_classify_empty() {
        assert_eq!(
            ClassifiedPayload::classify(b""),
            ClassifiedPayload::Text(String::new())
        );
    }

    #[test]
    fn test_context_from_captures() {
        let payload = ClassifiedPayload::Number(1.0);
        let re = Regex::new(r"sensors/(\w+)/(temp)?(x)?").unwrap();
        let caps = re.captures("sensors/kitchen/temp").unwrap();
        let ctx = RenderContext::from_captures(&payload, &caps);
        assert_eq!(ctx.captures, vec!["kitchen", "temp", ""]);
    }

    #[test]
    fn test_context_without_groups() {
        let payload = ClassifiedPayload::Number(1.0);
        let re = Regex::new(r"sensors/.*").unwrap();
        let caps = re.captures("sensors/kitchen").unwrap();
        let ctx = RenderContext::from_captures(&payload, &caps);
        assert!(ctx.captures.is_empty());
    }
}
