//! # Client Envelopes
//!
//! JSON messages exchanged with the client over the realtime WebSocket. Every
//! message is a JSON object whose `type` field selects the variant.
//!
//! ## Client → Relay:
//! - `{"type":"audio","audio":"<base64>"}`
//! - `{"type":"audio_commit"}`
//! - `{"type":"text","text":"..."}`
//! - `{"type":"sensor","heart_rate":115,"rage_probability":50,...}`
//!
//! ## Relay → Client:
//! - `text_response` / `text_response_done`
//! - `audio_response` / `audio_response_done`
//! - `error` (backend error object echoed as-is)

use crate::backend::BackendEvent;
use crate::stress::SensorMetrics;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages a client may send.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEnvelope {
    /// One base64 fragment of the current utterance
    Audio {
        #[serde(default)]
        audio: Option<String>,
    },

    /// No more audio for the current utterance
    AudioCommit,

    /// Typed user input
    Text {
        #[serde(default)]
        text: Option<String>,
    },

    /// Sensor reading, fields flattened into the envelope
    Sensor(SensorMetrics),
}

impl ClientEnvelope {
    /// Tags this relay understands. Anything else is ignored.
    pub const TAGS: [&'static str; 4] = ["audio", "audio_commit", "text", "sensor"];

    pub fn tag(&self) -> &'static str {
        match self {
            ClientEnvelope::Audio { .. } => "audio",
            ClientEnvelope::AudioCommit => "audio_commit",
            ClientEnvelope::Text { .. } => "text",
            ClientEnvelope::Sensor(_) => "sensor",
        }
    }
}

/// Messages the relay sends back.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEnvelope {
    TextResponse { text: String },
    TextResponseDone,
    AudioResponse { audio: String },
    AudioResponseDone,
    Error { error: Value },
}

impl From<BackendEvent> for ServerEnvelope {
    fn from(event: BackendEvent) -> Self {
        match event {
            BackendEvent::TextDelta(text) => ServerEnvelope::TextResponse { text },
            BackendEvent::TextDone => ServerEnvelope::TextResponseDone,
            BackendEvent::AudioDelta(audio) => ServerEnvelope::AudioResponse { audio },
            BackendEvent::AudioDone => ServerEnvelope::AudioResponseDone,
            BackendEvent::Error(error) => ServerEnvelope::Error { error },
        }
    }
}

/// Outcome of decoding one raw text frame.
#[derive(Debug, PartialEq)]
pub enum Decoded {
    Envelope(ClientEnvelope),
    /// Well-formed JSON with a tag this relay does not handle
    Unknown(String),
    /// Not JSON, no `type` tag, or fields of the wrong shape
    Malformed(String),
}

/// Decode a raw client frame.
///
/// The tag is checked before the variant body so an unrecognized tag is told
/// apart from a recognized tag with broken fields.
pub fn decode(raw: &str) -> Decoded {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(err) => return Decoded::Malformed(err.to_string()),
    };

    let tag = match value.get("type").and_then(Value::as_str) {
        Some(tag) => tag.to_string(),
        None => return Decoded::Malformed("missing \"type\" field".to_string()),
    };

    if !ClientEnvelope::TAGS.contains(&tag.as_str()) {
        return Decoded::Unknown(tag);
    }

    match serde_json::from_value(value) {
        Ok(envelope) => Decoded::Envelope(envelope),
        Err(err) => Decoded::Malformed(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_known_envelopes() {
        assert_eq!(
            decode(r#"{"type":"audio","audio":"QQ=="}"#),
            Decoded::Envelope(ClientEnvelope::Audio { audio: Some("QQ==".to_string()) })
        );
        assert_eq!(
            decode(r#"{"type":"audio_commit"}"#),
            Decoded::Envelope(ClientEnvelope::AudioCommit)
        );
        assert_eq!(
            decode(r#"{"type":"text"}"#),
            Decoded::Envelope(ClientEnvelope::Text { text: None })
        );

        match decode(r#"{"type":"sensor","heart_rate":115,"rage_probability":50,"device_id":"w-1"}"#) {
            Decoded::Envelope(ClientEnvelope::Sensor(metrics)) => {
                assert_eq!(metrics.heart_rate, Some(115.0));
                assert_eq!(metrics.rage_probability, Some(50.0));
            }
            other => panic!("unexpected decode result: {:?}", other),
        }
    }

    #[test]
    fn test_decode_unknown_and_malformed() {
        assert_eq!(decode(r#"{"type":"ping"}"#), Decoded::Unknown("ping".to_string()));
        assert!(matches!(decode("not json"), Decoded::Malformed(_)));
        assert!(matches!(decode(r#"{"audio":"QQ=="}"#), Decoded::Malformed(_)));
        assert!(matches!(decode(r#"{"type":"audio","audio":42}"#), Decoded::Malformed(_)));
    }

    #[test]
    fn test_server_envelope_wire_format() {
        let text = serde_json::to_value(ServerEnvelope::TextResponse { text: "hi".into() }).unwrap();
        assert_eq!(text, json!({"type": "text_response", "text": "hi"}));

        let done = serde_json::to_value(ServerEnvelope::AudioResponseDone).unwrap();
        assert_eq!(done, json!({"type": "audio_response_done"}));

        let error: ServerEnvelope = BackendEvent::Error(json!({"message": "rate limited"})).into();
        assert_eq!(
            serde_json::to_value(error).unwrap(),
            json!({"type": "error", "error": {"message": "rate limited"}})
        );
    }
}
