//! Wire format of entry messages on the topic.
//!
//! - **Key**: the entry id as UTF-8 bytes
//! - **Value**: the entry snapshot at creation time as a JSON object
//!   `{"id": ..., "name": ..., "timestamp": ...}`
//!
//! Readers ignore unknown fields, so producers may add optional fields
//! without breaking deployed consumers.

use crate::entry::{Entry, EntryId};
use thiserror::Error;

/// Errors raised while turning a topic message back into an [`Entry`].
///
/// Any of these makes the message a poison message: it is reported and
/// skipped, never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Message carried no value.
    #[error("Message has no payload")]
    MissingPayload,

    /// Key bytes are not valid UTF-8.
    #[error("Message key is not valid UTF-8: {0}")]
    InvalidKey(String),

    /// Value is not a valid entry JSON object.
    #[error("Message payload is not a valid entry: {0}")]
    InvalidPayload(String),

    /// Key and payload name different entries.
    #[error("Message key '{key}' does not match payload id '{payload_id}'")]
    KeyMismatch {
        /// Id found in the key
        key: String,
        /// Id found in the payload
        payload_id: String,
    },
}

/// Outbound message produced by the relay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryMessage {
    /// Partitioning key.
    pub key: EntryId,
    /// JSON-serialized creation snapshot.
    pub value: Vec<u8>,
}

impl EntryMessage {
    /// Shape the message for a created entry.
    ///
    /// The snapshot is always written without `winner`.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::InvalidPayload`] if the entry cannot be serialized.
    pub fn for_entry(entry: &Entry) -> Result<Self, DecodeError> {
        let value = serde_json::to_vec(&entry.creation_snapshot())
            .map_err(|e| DecodeError::InvalidPayload(e.to_string()))?;
        Ok(Self {
            key: entry.id.clone(),
            value,
        })
    }
}

/// A message read back from the topic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsumedMessage {
    /// Topic the message was read from.
    pub topic: String,
    /// Partition within the topic.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
    /// Raw key bytes, if any.
    pub key: Option<Vec<u8>>,
    /// Raw value bytes, if any.
    pub payload: Option<Vec<u8>>,
}

impl ConsumedMessage {
    /// Decode key and value into the entry snapshot.
    ///
    /// A missing key falls back to the payload's `id`.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] describing why the message is poison.
    pub fn decode(&self) -> Result<Entry, DecodeError> {
        let payload = self.payload.as_deref().ok_or(DecodeError::MissingPayload)?;
        let entry: Entry = serde_json::from_slice(payload)
            .map_err(|e| DecodeError::InvalidPayload(e.to_string()))?;

        if let Some(key) = self.key.as_deref() {
            let key = std::str::from_utf8(key).map_err(|e| DecodeError::InvalidKey(e.to_string()))?;
            if key != entry.id.as_str() {
                return Err(DecodeError::KeyMismatch {
                    key: key.to_string(),
                    payload_id: entry.id.to_string(),
                });
            }
        }

        Ok(entry)
    }

    /// Key rendered for logs.
    #[must_use]
    pub fn key_lossy(&self) -> String {
        self.key
            .as_deref()
            .map(|k| String::from_utf8_lossy(k).into_owned())
            .unwrap_or_default()
    }
}

/// Kafka-compatible murmur2 hash of a message key.
///
/// Matches the Java client's default partitioner (and librdkafka's
/// `murmur2_random`), so in-memory and broker partitioning agree.
#[must_use]
#[allow(clippy::many_single_char_names)]
pub fn murmur2(data: &[u8]) -> u32 {
    const SEED: u32 = 0x9747_b28c;
    const M: u32 = 0x5bd1_e995;
    const R: u32 = 24;

    #[allow(clippy::cast_possible_truncation)]
    let mut h: u32 = SEED ^ (data.len() as u32);

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h = h.wrapping_mul(M);
        h ^= k;
    }

    let tail = chunks.remainder();
    if tail.len() >= 3 {
        h ^= u32::from(tail[2]) << 16;
    }
    if tail.len() >= 2 {
        h ^= u32::from(tail[1]) << 8;
    }
    if !tail.is_empty() {
        h ^= u32::from(tail[0]);
        h = h.wrapping_mul(M);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;
    h
}

/// Partition a key is routed to, given the topic's partition count.
///
/// Returns partition 0 when `partitions` is 0.
#[must_use]
pub fn partition_for_key(key: &[u8], partitions: u32) -> i32 {
    if partitions == 0 {
        return 0;
    }
    let positive = murmur2(key) & 0x7fff_ffff;
    #[allow(clippy::cast_possible_wrap)]
    let partition = (positive % partitions) as i32;
    partition
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn entry(id: &str) -> Entry {
        Entry::new(
            EntryId::new(id),
            "Ada",
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        )
    }

    fn consumed(key: Option<&[u8]>, payload: Option<&[u8]>) -> ConsumedMessage {
        ConsumedMessage {
            topic: "raffle-entries".to_string(),
            partition: 0,
            offset: 0,
            key: key.map(<[u8]>::to_vec),
            payload: payload.map(<[u8]>::to_vec),
        }
    }

    #[test]
    fn message_key_is_entry_id() {
        let message = EntryMessage::for_entry(&entry("E1")).unwrap();
        assert_eq!(message.key, EntryId::new("E1"));
        let value: serde_json::Value = serde_json::from_slice(&message.value).unwrap();
        assert_eq!(value["id"], "E1");
        assert_eq!(value["name"], "Ada");
        assert_eq!(value["timestamp"], "2025-01-01T00:00:00Z");
    }

    #[test]
    fn message_value_never_carries_winner() {
        let mut decided = entry("E1");
        decided.winner = Some(true);
        let message = EntryMessage::for_entry(&decided).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&message.value).unwrap();
        assert!(value.get("winner").is_none());
    }

    #[test]
    fn decode_valid_message() {
        let payload: &[u8] = br#"{"id":"E1","name":"Ada","timestamp":"2025-01-01T00:00:00Z"}"#;
        let decoded = consumed(Some(&b"E1"[..]), Some(payload)).decode().unwrap();
        assert_eq!(decoded, entry("E1"));
    }

    #[test]
    fn decode_ignores_unknown_fields() {
        let payload: &[u8] =
            br#"{"id":"E1","name":"Ada","timestamp":"2025-01-01T00:00:00Z","source":"web"}"#;
        assert!(consumed(Some(&b"E1"[..]), Some(payload)).decode().is_ok());
    }

    #[test]
    fn decode_without_key_uses_payload_id() {
        let payload: &[u8] = br#"{"id":"E7","name":"Ada","timestamp":"2025-01-01T00:00:00Z"}"#;
        let decoded = consumed(None, Some(payload)).decode().unwrap();
        assert_eq!(decoded.id, EntryId::new("E7"));
    }

    #[test]
    fn decode_rejects_malformed_json() {
        let result = consumed(Some(&b"E3"[..]), Some(&b"{not json"[..])).decode();
        assert!(matches!(result, Err(DecodeError::InvalidPayload(_))));
    }

    #[test]
    fn decode_rejects_missing_payload() {
        assert_eq!(
            consumed(Some(&b"E3"[..]), None).decode(),
            Err(DecodeError::MissingPayload)
        );
    }

    #[test]
    fn decode_rejects_key_mismatch() {
        let payload: &[u8] = br#"{"id":"E1","name":"Ada","timestamp":"2025-01-01T00:00:00Z"}"#;
        let result = consumed(Some(&b"E2"[..]), Some(payload)).decode();
        assert!(matches!(result, Err(DecodeError::KeyMismatch { .. })));
    }

    #[test]
    fn decode_rejects_non_utf8_key() {
        let payload: &[u8] = br#"{"id":"E1","name":"Ada","timestamp":"2025-01-01T00:00:00Z"}"#;
        let result = consumed(Some(&[0xff_u8, 0xfe][..]), Some(payload)).decode();
        assert!(matches!(result, Err(DecodeError::InvalidKey(_))));
    }

    #[test]
    #[allow(clippy::cast_sign_loss)]
    fn murmur2_matches_java_client() {
        assert_eq!(murmur2(b"21"), (-973_932_308_i32) as u32);
        assert_eq!(murmur2(b"foobar"), (-790_332_482_i32) as u32);
        assert_eq!(murmur2(b"abc"), 479_470_107);
    }

    proptest! {
        #[test]
        fn partition_is_stable_and_in_range(key in proptest::collection::vec(any::<u8>(), 0..64), partitions in 1u32..64) {
            let first = partition_for_key(&key, partitions);
            prop_assert_eq!(first, partition_for_key(&key, partitions));
            prop_assert!(first >= 0);
            prop_assert!(first < i32::try_from(partitions).unwrap());
        }

        #[test]
        fn single_partition_always_zero(key in proptest::collection::vec(any::<u8>(), 0..64)) {
            prop_assert_eq!(partition_for_key(&key, 1), 0);
        }
    }
}
