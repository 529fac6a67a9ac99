#![no_main]
#[macro_use] extern crate libfuzzer_sys;
extern crate pekit;

use libfuzzer_sys::fuzz_target;
use pekit::block::BlockList;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(list) = text.parse::<BlockList>() {
            let _ = list.to_string().parse::<BlockList>();
        }
    }
});
