//! Fuzz target for decoding evaluator output into result trees.
//!
//! Run with: cargo +nightly fuzz run tree_parse -- -max_total_time=60

#![no_main]

use kiln_core::ResultTree;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        if let Ok(tree) = ResultTree::parse(input) {
            // Every member the tree reports must be reachable by name.
            for key in tree.keys() {
                assert!(tree.get(key).is_some());
            }
            assert_eq!(tree.keys().count(), tree.len());
            let _ = tree.to_plain();
        }
    }
});
