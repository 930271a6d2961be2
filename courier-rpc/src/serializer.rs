//! Serialization formats, identified on the wire by a numeric code

use courier_core::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;

/// Serialization format for frame bodies, arguments and return values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SerializerKind {
    /// Bincode serialization (binary, fast); the native format
    Bincode,
    /// JSON serialization (human-readable)
    Json,
    /// MessagePack serialization (binary, compact, cross-language)
    MessagePack,
}

impl Default for SerializerKind {
    fn default() -> Self {
        SerializerKind::Bincode
    }
}

impl SerializerKind {
    /// Code written in the frame header
    pub fn code(&self) -> u32 {
        match self {
            SerializerKind::Bincode => 0,
            SerializerKind::Json => 1,
            SerializerKind::MessagePack => 2,
        }
    }

    pub fn from_code(code: u32) -> Result<Self> {
        match code {
            0 => Ok(SerializerKind::Bincode),
            1 => Ok(SerializerKind::Json),
            2 => Ok(SerializerKind::MessagePack),
            other => Err(Error::Protocol(format!("Unknown serializer code: {}", other))),
        }
    }

    /// Serialize typed data to bytes
    pub fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            SerializerKind::Bincode => bincode::serialize(value)
                .map_err(|e| Error::Serialization(format!("Bincode serialization failed: {}", e))),
            SerializerKind::Json => serde_json::to_vec(value)
                .map_err(|e| Error::Serialization(format!("JSON serialization failed: {}", e))),
            SerializerKind::MessagePack => rmp_serde::to_vec(value).map_err(|e| {
                Error::Serialization(format!("MessagePack serialization failed: {}", e))
            }),
        }
    }

    /// Deserialize typed data from bytes
    pub fn deserialize<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        match self {
            SerializerKind::Bincode => bincode::deserialize(data).map_err(|e| {
                Error::Serialization(format!("Bincode deserialization failed: {}", e))
            }),
            SerializerKind::Json => serde_json::from_slice(data)
                .map_err(|e| Error::Serialization(format!("JSON deserialization failed: {}", e))),
            SerializerKind::MessagePack => rmp_serde::from_slice(data).map_err(|e| {
                Error::Serialization(format!("MessagePack deserialization failed: {}", e))
            }),
        }
    }
}

impl fmt::Display for SerializerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SerializerKind::Bincode => "bincode",
            SerializerKind::Json => "json",
            SerializerKind::MessagePack => "messagepack",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct HelloObject {
        id: i32,
        message: String,
    }

    #[test]
    fn test_codes() {
        for kind in [
            SerializerKind::Bincode,
            SerializerKind::Json,
            SerializerKind::MessagePack,
        ] {
            assert_eq!(SerializerKind::from_code(kind.code()).unwrap(), kind);
        }
        assert!(matches!(SerializerKind::from_code(3), Err(Error::Protocol(_))));
        assert!(matches!(SerializerKind::from_code(4), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_formats_agree_on_values() {
        let value = HelloObject {
            id: 12,
            message: "This is a message".to_string(),
        };

        for kind in [
            SerializerKind::Bincode,
            SerializerKind::Json,
            SerializerKind::MessagePack,
        ] {
            let bytes = kind.serialize(&value).unwrap();
            let back: HelloObject = kind.deserialize(&bytes).unwrap();
            assert_eq!(back, value, "{} lost data", kind);
        }
    }

    #[test]
    fn test_json_is_readable() {
        let bytes = SerializerKind::Json.serialize("8686 hello").unwrap();
        assert_eq!(bytes, b"\"8686 hello\"");
    }

    #[test]
    fn test_garbage_input() {
        let result: Result<HelloObject> = SerializerKind::Json.deserialize(b"\x00\x01");
        assert!(matches!(result, Err(Error::Serialization(_))));
    }
}
