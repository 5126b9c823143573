#![allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]

//! Property tests for the timestamp codec the whole vault leans on.

use coffre_vault::clock::{iso8601_from_epoch, parse_iso8601};
use proptest::prelude::*;

proptest! {
    /// parse(format(t)) == t for the full supported range (1970–2100).
    #[test]
    fn format_parse_roundtrip(epoch in 0u64..4_102_444_800) {
        let formatted = iso8601_from_epoch(epoch);
        prop_assert_eq!(parse_iso8601(&formatted), Some(epoch));
    }

    /// Formatted timestamps sort lexicographically in time order.
    #[test]
    fn lexicographic_order_matches_time_order(
        a in 0u64..4_102_444_800,
        b in 0u64..4_102_444_800,
    ) {
        let fa = iso8601_from_epoch(a);
        let fb = iso8601_from_epoch(b);
        prop_assert_eq!(a.cmp(&b), fa.cmp(&fb));
    }

    /// Arbitrary input never panics the parser.
    #[test]
    fn parser_never_panics(input in ".{0,40}") {
        let _ = parse_iso8601(&input);
    }
}
