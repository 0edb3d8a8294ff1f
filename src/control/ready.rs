//! `$ready` line announcing the data plane.
//!
//! Once the worker listens on its pipe it prints a single JSON line on
//! stdout:
//!
//! ```text
//! {"type":"$ready","protocol":"1.0.0","name":"ssr","pipe":"/tmp/worker-fetch-42-1f.sock"}
//! ```
//!
//! The parent reads stdout line by line, skips anything that is not a ready
//! line and connects to `pipe`.

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Protocol version string.
pub const PROTOCOL_VERSION: &str = "1.0.0";

const READY_TYPE: &str = "$ready";

/// The readiness announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyMessage {
    #[serde(rename = "type")]
    kind: String,
    /// Protocol version the worker speaks.
    pub protocol: String,
    /// Worker name from its options.
    pub name: String,
    /// Pipe or socket path to connect to.
    pub pipe: String,
}

impl ReadyMessage {
    pub fn new(name: impl Into<String>, pipe: impl Into<String>) -> Self {
        Self {
            kind: READY_TYPE.to_string(),
            protocol: PROTOCOL_VERSION.to_string(),
            name: name.into(),
            pipe: pipe.into(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse one stdout line.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Json`] for malformed JSON, [`BridgeError::Protocol`]
    /// for a line that is not a ready line or speaks another protocol.
    pub fn parse(line: &str) -> Result<Self> {
        let msg: ReadyMessage = serde_json::from_str(line.trim_end())?;
        if msg.kind != READY_TYPE {
            return Err(BridgeError::Protocol(format!(
                "expected {} line, got type '{}'",
                READY_TYPE, msg.kind
            )));
        }
        if msg.protocol != PROTOCOL_VERSION {
            return Err(BridgeError::Protocol(format!(
                "protocol version mismatch: worker speaks {}, expected {}",
                msg.protocol, PROTOCOL_VERSION
            )));
        }
        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_line_format() {
        let json = ReadyMessage::new("ssr", "/tmp/a.sock").to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["type"], "$ready");
        assert_eq!(value["protocol"], PROTOCOL_VERSION);
        assert_eq!(value["name"], "ssr");
        assert_eq!(value["pipe"], "/tmp/a.sock");
        assert!(!json.contains('\n'));
    }

    #[test]
    fn test_parse_accepts_trailing_newline() {
        let line = format!("{}\n", ReadyMessage::new("w", "p").to_json().unwrap());
        let msg = ReadyMessage::parse(&line).unwrap();
        assert_eq!(msg, ReadyMessage::new("w", "p"));
    }

    #[test]
    fn test_parse_rejects_other_lines() {
        let err = ReadyMessage::parse(r#"{"type":"log","protocol":"1.0.0","name":"w","pipe":"p"}"#)
            .unwrap_err();
        assert!(matches!(err, BridgeError::Protocol(_)));

        let err = ReadyMessage::parse(r#"{"type":"$ready","protocol":"0.1.0","name":"w","pipe":"p"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("version mismatch"));

        assert!(matches!(
            ReadyMessage::parse("starting up..."),
            Err(BridgeError::Json(_))
        ));
    }
}
