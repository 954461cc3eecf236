//! MessagePack and JSON codec helpers.
//!
//! MessagePack is the compact transport between runtime and host. Structs are
//! encoded with field names so that internally tagged enums survive the trip.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Encode a value to MessagePack bytes.
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if serialisation fails.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    rmp_serde::to_vec_named(value).map_err(ProtocolError::Encode)
}

/// Decode a value from MessagePack bytes.
///
/// # Errors
///
/// Returns [`ProtocolError::Decode`] if deserialisation fails.
pub fn decode<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, ProtocolError> {
    rmp_serde::from_slice(bytes).map_err(ProtocolError::Decode)
}

/// Encode a value as a single line of JSON.
///
/// # Errors
///
/// Returns [`ProtocolError::Json`] if serialisation fails.
pub fn encode_json<T: Serialize>(value: &T) -> Result<String, ProtocolError> {
    serde_json::to_string(value).map_err(ProtocolError::Json)
}

/// Decode a value from JSON text.
///
/// # Errors
///
/// Returns [`ProtocolError::Json`] if deserialisation fails.
pub fn decode_json<'a, T: Deserialize<'a>>(text: &'a str) -> Result<T, ProtocolError> {
    serde_json::from_str(text).map_err(ProtocolError::Json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::HostMessage;
    use crate::task::TaskId;

    #[test]
    fn test_host_message_survives_msgpack() {
        let msg = HostMessage::Complete {
            task_id: TaskId(4),
            remote: true,
        };
        let bytes = encode(&msg).unwrap();
        let restored: HostMessage = decode(&bytes).unwrap();
        assert_eq!(restored, msg);
    }

    #[test]
    fn test_decode_invalid_bytes() {
        let result: Result<HostMessage, _> = decode(&[0xFF, 0xFF]);
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_decode_invalid_json() {
        let result: Result<HostMessage, _> = decode_json("{ not json");
        assert!(matches!(result, Err(ProtocolError::Json(_))));
    }
}
