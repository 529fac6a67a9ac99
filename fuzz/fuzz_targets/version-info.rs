#![no_main]
#[macro_use] extern crate libfuzzer_sys;
extern crate pekit;

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let info = pekit::versioninfo::VsVersionInfo::parse(data);
    let _ = info.to_bytes();
});
