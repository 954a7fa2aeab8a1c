//! JSON text codec for relay frames.
//!
//! Wire format: one JSON object per WebSocket message.

use crate::envelope::Envelope;
use crate::error::{RelayError, RelayResult};
use serde_json::Value;

/// Encode a serializable value into a JSON text frame.
pub fn encode<T: serde::Serialize>(value: &T) -> RelayResult<String> {
    Ok(serde_json::to_string(value)?)
}

/// Decode a client frame into an addressed envelope.
///
/// Any client-supplied `from` is discarded before typing; the router stamps
/// the authenticated sender later. Frames that are not a JSON object, carry
/// an unknown `type`, or lack a string `to` are rejected.
pub fn decode_envelope(data: &[u8]) -> RelayResult<Envelope> {
    let value: Value = serde_json::from_slice(data)?;
    let Value::Object(mut fields) = value else {
        return Err(RelayError::InvalidMessage(
            "envelope is not a JSON object".into(),
        ));
    };
    fields.remove("from");
    match fields.get("to") {
        Some(Value::String(_)) => {}
        Some(_) => {
            return Err(RelayError::InvalidMessage("`to` must be a string".into()));
        }
        None => return Err(RelayError::InvalidMessage("missing `to`".into())),
    }
    Ok(serde_json::from_value(Value::Object(fields))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{EnvelopeKind, Notice};

    #[test]
    fn decode_drops_client_from() {
        let env =
            decode_envelope(br#"{"type":"encrypted","to":"bob","payload":"X","from":"mallory"}"#)
                .unwrap();
        assert_eq!(env.kind, EnvelopeKind::Encrypted);
        assert_eq!(env.from, None);
        assert!(!env.body.contains_key("from"));
    }

    #[test]
    fn decode_tolerates_non_string_from() {
        let env = decode_envelope(br#"{"type":"encrypted","to":"bob","from":42}"#).unwrap();
        assert_eq!(env.from, None);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode_envelope(b"not json").is_err());
        assert!(decode_envelope(b"[1,2,3]").is_err());
        assert!(decode_envelope(br#""hello""#).is_err());
    }

    #[test]
    fn decode_rejects_missing_or_bad_recipient() {
        assert!(matches!(
            decode_envelope(br#"{"type":"encrypted","payload":"X"}"#),
            Err(RelayError::InvalidMessage(_))
        ));
        assert!(matches!(
            decode_envelope(br#"{"type":"encrypted","to":7}"#),
            Err(RelayError::InvalidMessage(_))
        ));
    }

    #[test]
    fn decode_rejects_unknown_type() {
        assert!(decode_envelope(br#"{"type":"status","to":"bob"}"#).is_err());
        assert!(decode_envelope(br#"{"to":"bob"}"#).is_err());
    }

    #[test]
    fn encode_notice() {
        let text = encode(&Notice::error("auth failed")).unwrap();
        assert_eq!(text, r#"{"type":"error","error":"auth failed"}"#);
    }
}
