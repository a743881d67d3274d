//! Property-based tests for leader records and staleness
//!
//! Data files are shared with other processes and may hold anything, so the
//! decoder must reject garbage without panicking, and staleness must only
//! ever move one way as time passes.

use crate::heartbeat::is_stale;
use crate::leader_info::{LeaderInfo, ENCODED_LEN};
use crate::node::NodeId;
use proptest::prelude::*;
use uuid::Uuid;

/// Strategy for generating non-nil node ids
pub fn node_id_strategy() -> impl Strategy<Value = NodeId> {
    any::<u128>()
        .prop_filter("nil uuid is not a node id", |bits| *bits != 0)
        .prop_map(|bits| NodeId::from_uuid(Uuid::from_u128(bits)))
}

/// Strategy for generating records a live leader could write
pub fn leader_info_strategy() -> impl Strategy<Value = LeaderInfo> {
    (
        node_id_strategy(),
        1i64..=3_600_000i64,              // interval, up to an hour
        0i64..=4_102_444_800_000i64,      // timestamp, up to 2100
    )
        .prop_map(|(id, interval, timestamp)| LeaderInfo::new(id, interval, timestamp))
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        /// Arbitrary file content never panics the decoder
        #[test]
        fn test_decode_arbitrary_bytes(bytes in prop::collection::vec(any::<u8>(), 0..128)) {
            let decoded = LeaderInfo::decode(&bytes);
            if bytes.len() != ENCODED_LEN {
                prop_assert!(decoded.is_none());
            }
            if let Some(info) = decoded {
                prop_assert!(info.heartbeat_interval_millis() > 0);
                prop_assert!(!info.id().as_uuid().is_nil());
            }
        }

        /// Any written record reads back as itself
        #[test]
        fn test_written_records_decode(info in leader_info_strategy()) {
            prop_assert_eq!(LeaderInfo::decode(&info.encode()), Some(info));
        }

        /// A truncated or extended record is never mistaken for a leader
        #[test]
        fn test_resized_records_rejected(
            info in leader_info_strategy(),
            cut in 0usize..ENCODED_LEN,
            extra in prop::collection::vec(any::<u8>(), 1..16)
        ) {
            let encoded = info.encode();
            prop_assert!(LeaderInfo::decode(&encoded[..cut]).is_none());

            let mut extended = encoded.to_vec();
            extended.extend_from_slice(&extra);
            prop_assert!(LeaderInfo::decode(&extended).is_none());
        }

        /// Once stale, a record stays stale as time moves on
        #[test]
        fn test_staleness_monotone_in_time(
            info in leader_info_strategy(),
            now in 0i64..=4_200_000_000_000i64,
            later in 0i64..=3_600_000i64,
            multiplier in 1u32..=100u32
        ) {
            if is_stale(&info, now, multiplier) {
                prop_assert!(is_stale(&info, now + later, multiplier));
            }
        }

        /// A larger multiplier never makes a live record stale
        #[test]
        fn test_staleness_monotone_in_multiplier(
            info in leader_info_strategy(),
            now in 0i64..=4_200_000_000_000i64,
            multiplier in 1u32..=100u32,
            bump in 0u32..=100u32
        ) {
            if !is_stale(&info, now, multiplier) {
                prop_assert!(!is_stale(&info, now, multiplier + bump));
            }
        }

        /// Exactly at the timeout boundary the record is still live
        #[test]
        fn test_staleness_boundary(
            info in leader_info_strategy(),
            multiplier in 1u32..=100u32
        ) {
            let timeout = info.heartbeat_interval_millis() * i64::from(multiplier);
            let deadline = info.heartbeat_timestamp_millis() + timeout;
            prop_assert!(!is_stale(&info, deadline, multiplier));
            prop_assert!(is_stale(&info, deadline + 1, multiplier));
        }
    }
}
