//! Messages exchanged with editor clients.

use howl::{AnnotationLog, AnnotationRecord};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// `{"raw": true, "data": "<source>"}`
    Source(String),
    /// `{"raw": false, "filepath": "<path>"}`
    File(PathBuf),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    raw: bool,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    filepath: Option<String>,
}

impl Request {
    /// `None` for anything that is not a well-formed request.
    pub fn parse(text: &str) -> Option<Self> {
        let envelope: Envelope = serde_json::from_str(text).ok()?;
        if envelope.raw {
            envelope.data.map(Request::Source)
        } else {
            envelope
                .filepath
                .filter(|path| !path.is_empty())
                .map(|path| Request::File(path.into()))
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Request::Source(text) => format!("raw source ({} bytes)", text.len()),
            Request::File(path) => format!("file {}", path.display()),
        }
    }
}

/// One record, streamed as soon as it is produced.
pub fn record(path: &str, record: &AnnotationRecord) -> String {
    let output = serde_json::to_string(record).unwrap_or_default();
    json!({ "statusCode": 200, "path": path, "output": output }).to_string()
}

/// The whole log; always the last message of a request.
pub fn total(path: &str, log: &AnnotationLog) -> String {
    json!({
        "statusCode": 200,
        "path": path,
        "total_output": log.to_json(),
        "eof": 1,
    })
    .to_string()
}

pub fn bad_request(path: &str) -> String {
    json!({ "statusCode": 400, "message": "Bad Request", "path": path }).to_string()
}

pub fn internal_error(path: &str) -> String {
    json!({ "statusCode": 500, "message": "Internal Server Error", "path": path }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use howl::FormattedValue;
    use pretty_assertions::assert_eq;
    use serde_json::Value;

    #[test]
    fn parses_both_request_kinds() {
        assert_eq!(
            Request::parse(r#"{"raw": true, "data": "x = 1"}"#),
            Some(Request::Source("x = 1".into()))
        );
        assert_eq!(
            Request::parse(r#"{"raw": false, "filepath": "/tmp/a.py"}"#),
            Some(Request::File("/tmp/a.py".into()))
        );
    }

    #[test]
    fn rejects_malformed_requests() {
        for text in ["not json", r#"{"raw": true}"#, r#"{"raw": false, "filepath": ""}"#, "{}"] {
            assert_eq!(Request::parse(text), None, "{text}");
        }
    }

    #[test]
    fn record_messages_embed_the_record_as_text() {
        let message = record("/", &AnnotationRecord::value(3, "x", FormattedValue::Int(1)));
        let parsed: Value = serde_json::from_str(&message).unwrap();
        assert_eq!(parsed["statusCode"], 200);
        assert_eq!(parsed["path"], "/");
        let inner: Value = serde_json::from_str(parsed["output"].as_str().unwrap()).unwrap();
        assert_eq!(
            inner,
            json!({ "line_number": 3, "source": "x", "value": 1, "error": false })
        );
    }

    #[test]
    fn total_messages_close_the_stream() {
        let parsed: Value = serde_json::from_str(&total("/run", &AnnotationLog::new())).unwrap();
        assert_eq!(parsed["eof"], 1);
        assert_eq!(parsed["total_output"], "[]");
    }

    #[test]
    fn error_messages() {
        let parsed: Value = serde_json::from_str(&bad_request("/")).unwrap();
        assert_eq!(parsed["statusCode"], 400);
        let parsed: Value = serde_json::from_str(&internal_error("/")).unwrap();
        assert_eq!(parsed["message"], "Internal Server Error");
    }
}
