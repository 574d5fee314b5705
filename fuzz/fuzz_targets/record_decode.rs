//! Fuzz target for the cache file decoder.
//!
//! Arbitrary bytes must decode or fail with an error, never panic. Anything
//! that decodes must survive a re-encode unchanged.
//!
//! Run with: cargo +nightly fuzz run record_decode -- -max_total_time=60

#![no_main]

use kiln_storage::record::{decode, encode};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(entries) = decode(data) {
        let reencoded = encode(&entries).expect("decoded cache should re-encode");
        let again = decode(&reencoded).expect("re-encoded cache should decode");
        assert_eq!(entries, again);
    }
});
