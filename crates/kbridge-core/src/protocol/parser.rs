//! Reader and writer for kernel wire messages.
//!
//! Tolerant reader: unknown fields are ignored, a missing header `msg_type`
//! is filled from a top-level `msg_type`, and only a missing or unknown
//! `channel` is rejected.

use serde_json::Value;

use super::types::WireMessage;
use crate::error::{Error, Result};

/// Parse a single NDJSON line from a kernel's stdout.
pub fn parse_line(line: &str) -> Result<WireMessage> {
    let raw: Value = serde_json::from_str(line)?;
    parse_value(raw)
}

/// Parse a JSON value into a wire message.
pub fn parse_value(mut raw: Value) -> Result<WireMessage> {
    let obj = raw
        .as_object_mut()
        .ok_or_else(|| Error::WireParse("Message is not a JSON object".into()))?;

    if !obj.contains_key("channel") {
        return Err(Error::WireParse("Missing 'channel' field".into()));
    }

    let top_level_type = obj
        .get("msg_type")
        .and_then(Value::as_str)
        .map(String::from);

    let header = obj
        .entry("header")
        .or_insert_with(|| serde_json::json!({}));
    if !header.is_object() {
        return Err(Error::WireParse("'header' is not an object".into()));
    }
    if header.get("msg_type").and_then(Value::as_str).is_none_or(str::is_empty) {
        let Some(msg_type) = top_level_type else {
            return Err(Error::WireParse("Missing message type".into()));
        };
        header["msg_type"] = Value::String(msg_type);
    }

    serde_json::from_value(raw).map_err(|e| Error::WireParse(e.to_string()))
}

/// Serialize a message as one NDJSON line (no trailing newline).
pub fn encode(message: &WireMessage) -> Result<String> {
    Ok(serde_json::to_string(message)?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::protocol::{Channel, ExecuteRequest, Header};
    use serde_json::json;

    #[test]
    fn parses_iopub_stream() {
        let line = r#"{"channel":"iopub","header":{"msg_id":"m1","msg_type":"stream"},
            "parent_header":{"msg_id":"req-1","msg_type":"execute_request"},
            "metadata":{},"content":{"name":"stdout","text":"4\n"}}"#;
        let msg = parse_line(line).unwrap();
        assert_eq!(msg.channel, Channel::IoPub);
        assert_eq!(msg.msg_type(), "stream");
        assert_eq!(msg.parent_msg_id(), Some("req-1"));
        assert_eq!(msg.content["text"], "4\n");
        assert!(msg.buffers.is_empty());
    }

    #[test]
    fn empty_parent_header_is_none() {
        let line = r#"{"channel":"iopub","header":{"msg_type":"status"},"parent_header":{}}"#;
        let msg = parse_line(line).unwrap();
        assert!(msg.parent_header.is_none());
        assert_eq!(msg.parent_msg_id(), None);
    }

    #[test]
    fn top_level_msg_type_fills_header() {
        let line = r#"{"channel":"shell","msg_type":"execute_reply","content":{"status":"ok"}}"#;
        let msg = parse_line(line).unwrap();
        assert_eq!(msg.msg_type(), "execute_reply");
    }

    #[test]
    fn missing_channel_is_rejected() {
        let err = parse_line(r#"{"header":{"msg_type":"status"}}"#).unwrap_err();
        assert!(matches!(err, Error::WireParse(_)));
    }

    #[test]
    fn missing_type_is_rejected() {
        let err = parse_line(r#"{"channel":"iopub","content":{}}"#).unwrap_err();
        assert!(matches!(err, Error::WireParse(_)));
    }

    #[test]
    fn unknown_channel_is_rejected() {
        let err = parse_line(r#"{"channel":"hb","msg_type":"ping"}"#).unwrap_err();
        assert!(matches!(err, Error::WireParse(_)));
    }

    #[test]
    fn invalid_json_is_json_error() {
        assert!(matches!(parse_line("not json").unwrap_err(), Error::Json(_)));
    }

    #[test]
    fn comm_id_read_from_content() {
        let line = r#"{"channel":"iopub","msg_type":"comm_open",
            "content":{"comm_id":"abc123","target_name":"jupyter.widget","data":{}}}"#;
        let msg = parse_line(line).unwrap();
        assert_eq!(msg.comm_id(), Some("abc123"));
    }

    #[test]
    fn encoded_execute_request_keeps_buffers_and_content() {
        let header = Header::new("execute_request", "session-1");
        let content = serde_json::to_value(ExecuteRequest::new("x = 2 + 2", true)).unwrap();
        let mut msg = WireMessage::new(Channel::Shell, header, content);
        msg.buffers.push(vec![0, 159, 255]);

        let line = encode(&msg).unwrap();
        assert!(!line.contains('\n'));
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["channel"], "shell");
        assert_eq!(value["content"]["code"], "x = 2 + 2");
        assert_eq!(value["content"]["allow_stdin"], true);
        assert_eq!(value["buffers"], json!([[0, 159, 255]]));
        assert_eq!(value["header"]["version"], "5.3");
    }

    #[test]
    fn content_numbers_and_key_order_survive_round_trip() {
        let line = r#"{"channel":"iopub","header":{"msg_type":"execute_result"},"content":{"z":1,"n":123456789012345678901234567890,"f":0.1000000000000000055511151231257827,"a":{"y":2,"b":3}}}"#;
        let msg = parse_line(line).unwrap();
        let encoded = encode(&msg).unwrap();
        assert!(
            encoded.contains(r#""content":{"z":1,"n":123456789012345678901234567890,"f":0.1000000000000000055511151231257827,"a":{"y":2,"b":3}}"#),
            "{encoded}"
        );
    }
}
