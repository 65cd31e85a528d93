//! Fuzz target for keyword parsing.
//!
//! `parse` accepts any string; the display form of the result must parse
//! back to the same keyword.

#![no_main]

use libfuzzer_sys::fuzz_target;
use restore_engine::datom::Keyword;

fuzz_target!(|data: &str| {
    let kw = Keyword::parse(data);
    let _ = Keyword::parse(&kw.to_string());
});
