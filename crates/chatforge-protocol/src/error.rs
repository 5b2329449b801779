//! Error types for the protocol layer.
//!
//! Each crate in chatforge defines its own error enum. This keeps errors
//! specific and meaningful — when you see a `ProtocolError`, you know the
//! problem is in framing or serialization, not in networking or routing.

/// Errors that can occur while framing or (de)serializing wire data.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into JSON bytes).
    ///
    /// The inner `serde_json::Error` is the original error from serde_json.
    /// We wrap it so callers deal with `ProtocolError` uniformly.
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning JSON bytes into a Rust type).
    ///
    /// Common causes: malformed JSON, missing required fields, or fields
    /// of the wrong type. The dispatcher maps this onto the
    /// client-data-error status code.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// A frame header announced a body larger than the configured cap.
    ///
    /// A length prefix like this is almost always a desynchronized or
    /// hostile peer; the connection should be dropped rather than letting
    /// the length drive an allocation.
    #[error("frame of {len} bytes exceeds the {max} byte cap")]
    FrameTooLarge { len: usize, max: usize },

    /// A tagged frame body was too short to hold its correlation id.
    #[error("tagged frame body of {len} bytes is shorter than the id")]
    TruncatedFrame { len: usize },
}
