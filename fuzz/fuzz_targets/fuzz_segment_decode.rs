//! Fuzz target for the segment wire codec.
//!
//! Arbitrary bytes must never panic the decoder; they either parse into a
//! segment or return a codec error.

#![no_main]

use libfuzzer_sys::fuzz_target;
use restore_engine::segment::Segment;

fuzz_target!(|data: &[u8]| {
    let _ = Segment::decode(data);
});
