//! Protobuf decoding of GTFS Realtime payloads.

use prost::Message;

use crate::gtfs_rt::FeedMessage;

/// Decodes a protobuf-encoded GTFS-RT [`FeedMessage`] from raw bytes.
///
/// # Errors
///
/// Returns the decode error if the bytes are not a valid `FeedMessage`,
/// including a message missing its required header fields.
pub fn parse_feed(bytes: &[u8]) -> Result<FeedMessage, prost::DecodeError> {
    FeedMessage::decode(bytes)
}
