//! Body converters
//!
//! Closed set of encodings selected by the endpoint's content-type preference.

use hr_platform::ContentType;
use serde_json::Value;

use crate::error::{DispatchError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyConverter {
    Json,
    FormUrlEncoded,
}

impl BodyConverter {
    pub fn for_content_type(content_type: ContentType) -> Self {
        match content_type {
            ContentType::Json => BodyConverter::Json,
            ContentType::FormUrlEncoded => BodyConverter::FormUrlEncoded,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            BodyConverter::Json => ContentType::Json.as_str(),
            BodyConverter::FormUrlEncoded => ContentType::FormUrlEncoded.as_str(),
        }
    }

    pub fn convert(&self, payload: &Value) -> Result<(Vec<u8>, &'static str)> {
        let bytes = match self {
            BodyConverter::Json => serde_json::to_vec(payload)
                .map_err(|e| DispatchError::InvalidRequest(format!("payload is not serializable: {}", e)))?,
            BodyConverter::FormUrlEncoded => form_encode(payload)?.into_bytes(),
        };
        Ok((bytes, self.content_type()))
    }
}

/// Flatten a top-level object into `key=value` pairs. `null` becomes the
/// empty string; nested arrays and objects are sent as JSON text.
fn form_encode(payload: &Value) -> Result<String> {
    let Value::Object(map) = payload else {
        return Err(DispatchError::InvalidRequest(
            "form-url-encoded payloads must be JSON objects".to_string(),
        ));
    };

    let pairs: Vec<String> = map
        .iter()
        .map(|(key, value)| {
            let text = match value {
                Value::Null => String::new(),
                Value::String(s) => s.clone(),
                Value::Bool(b) => b.to_string(),
                Value::Number(n) => n.to_string(),
                nested => nested.to_string(),
            };
            format!("{}={}", urlencoding::encode(key), urlencoding::encode(&text))
        })
        .collect();
    Ok(pairs.join("&"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_form_null_becomes_empty() {
        let (body, ct) = BodyConverter::FormUrlEncoded
            .convert(&json!({"key": "value", "null_key": null}))
            .unwrap();
        assert_eq!(String::from_utf8(body).unwrap(), "key=value&null_key=");
        assert_eq!(ct, "application/x-www-form-urlencoded");
    }

    #[test]
    fn test_form_escapes_and_stringifies() {
        let (body, _) = BodyConverter::FormUrlEncoded
            .convert(&json!({"a b": "x&y", "n": 5, "ok": true, "obj": {"k": 1}}))
            .unwrap();
        assert_eq!(
            String::from_utf8(body).unwrap(),
            "a%20b=x%26y&n=5&obj=%7B%22k%22%3A1%7D&ok=true"
        );
    }

    #[test]
    fn test_form_rejects_non_object() {
        assert!(BodyConverter::FormUrlEncoded.convert(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_json_pass_through() {
        let payload = json!({"amount": 100, "nested": {"a": [1, 2]}});
        let (body, ct) = BodyConverter::Json.convert(&payload).unwrap();
        assert_eq!(ct, "application/json");
        assert_eq!(serde_json::from_slice::<Value>(&body).unwrap(), payload);
    }

    #[test]
    fn test_selected_by_content_type() {
        assert_eq!(BodyConverter::for_content_type(ContentType::Json), BodyConverter::Json);
        assert_eq!(
            BodyConverter::for_content_type(ContentType::FormUrlEncoded),
            BodyConverter::FormUrlEncoded
        );
    }
}
