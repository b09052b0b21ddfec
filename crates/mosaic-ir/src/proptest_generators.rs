//! Proptest strategies for blocks, payloads and wire messages.

use proptest::prelude::*;

use crate::block_graph::{BlockId, Location};
use crate::message::{BlockSummaryMessage, ErrorConditionMessage, Payload, PostConditionMessage};
use crate::status::AlgorithmStatus;

pub fn arb_algorithm_status() -> impl Strategy<Value = AlgorithmStatus> {
    (any::<bool>(), any::<bool>(), any::<bool>())
        .prop_map(|(checked, sound, precise)| AlgorithmStatus::new(checked, sound, precise))
}

pub fn arb_block_id() -> impl Strategy<Value = BlockId> {
    "[A-Z][a-z0-9_]{0,6}".prop_map(BlockId::new)
}

/// Payload with a few domain entries and valid status keys.
pub fn arb_payload() -> impl Strategy<Value = Payload> {
    (
        proptest::collection::btree_map("[a-z]{1,4}", "[ -~]{0,12}", 0..5),
        arb_algorithm_status(),
    )
        .prop_map(|(entries, status)| {
            entries
                .into_iter()
                .map(|(k, v)| (format!("var.{k}"), v))
                .collect::<Payload>()
                .with_status(status)
        })
}

pub fn arb_message() -> impl Strategy<Value = BlockSummaryMessage> {
    prop_oneof![
        (arb_block_id(), 0..64u32, arb_payload(), any::<bool>(), any::<bool>()).prop_map(
            |(id, loc, payload, reachable, full_path)| {
                PostConditionMessage::new(id, Location::new(loc), payload, reachable, full_path)
                    .into()
            }
        ),
        (arb_block_id(), 0..64u32, arb_payload(), any::<bool>()).prop_map(
            |(id, loc, payload, first)| {
                ErrorConditionMessage::new(id, Location::new(loc), payload, first).into()
            }
        ),
    ]
}

/// Block spans `(id, start, end)` that [`crate::BlockGraph::connect`] accepts
/// with entry location `0`.
///
/// Block `0` starts at the entry; every later block starts where an earlier
/// block ends, so all blocks are reachable from the root. Ends never return
/// to the entry location, which keeps the root unique.
pub fn arb_block_spans() -> impl Strategy<Value = Vec<(BlockId, Location, Location)>> {
    (1..=7usize)
        .prop_flat_map(|n| {
            let max_loc = n as u32 + 1;
            (
                proptest::collection::vec(1..=max_loc, n),
                proptest::collection::vec(any::<prop::sample::Index>(), n),
            )
        })
        .prop_map(|(ends, parents)| {
            let mut spans = Vec::with_capacity(ends.len());
            for (i, end) in ends.iter().enumerate() {
                let start = if i == 0 {
                    0
                } else {
                    ends[parents[i].index(i)]
                };
                spans.push((
                    BlockId::new(format!("B{i}")),
                    Location::new(start),
                    Location::new(*end),
                ));
            }
            spans
        })
}
