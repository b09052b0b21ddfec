//! Algebraic properties of the interval domain as seen by the protocol.

mod common;

use proptest::prelude::*;

use mosaic_engine::analysis::LocalAnalysis;
use mosaic_engine::domains::interval::{IntervalAnalysis, IntervalOptions, IntervalState};
use mosaic_ir::{BlockBody, BlockId, Location};

use common::arb_interval_state;

fn analysis() -> IntervalAnalysis {
    let body = BlockBody {
        id: BlockId::new("B"),
        start: Location::new(0),
        end: Location::new(1),
        edges: Vec::new(),
    };
    IntervalAnalysis::new(body, &Default::default(), IntervalOptions::default())
}

proptest! {
    #[test]
    fn combine_is_order_insensitive(
        a in arb_interval_state(),
        b in arb_interval_state(),
        c in arb_interval_state(),
    ) {
        let analysis = analysis();
        let abc = analysis.combine(&[a.clone(), b.clone(), c.clone()]).unwrap();
        let cba = analysis.combine(&[c.clone(), b.clone(), a.clone()]).unwrap();
        prop_assert_eq!(&abc, &cba);

        let ab = analysis.combine(&[a, b]).unwrap();
        let nested = analysis.combine(&[ab, c]).unwrap();
        prop_assert_eq!(abc, nested);
    }

    #[test]
    fn combined_state_covers_every_input(
        a in arb_interval_state(),
        b in arb_interval_state(),
    ) {
        let analysis = analysis();
        let joined = analysis.combine(&[a.clone(), b.clone()]).unwrap();
        prop_assert!(analysis.is_covered(&a, &joined).unwrap());
        prop_assert!(analysis.is_covered(&b, &joined).unwrap());
    }

    #[test]
    fn payload_decoding_preserves_coverage(state in arb_interval_state()) {
        let analysis = analysis();
        let decoded = analysis.deserialize(&analysis.serialize(&state, &())).unwrap();
        prop_assert!(analysis.is_covered(&state, &decoded).unwrap());
        prop_assert!(analysis.is_covered(&decoded, &state).unwrap());
    }

    #[test]
    fn top_covers_everything(state in arb_interval_state()) {
        let analysis = analysis();
        prop_assert!(analysis.is_covered(&state, &IntervalState::top()).unwrap());
    }
}
