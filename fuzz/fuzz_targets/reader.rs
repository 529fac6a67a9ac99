#![no_main]
#[macro_use] extern crate libfuzzer_sys;
extern crate pekit;

use libfuzzer_sys::fuzz_target;
use pekit::pe::PeReader;
use std::io::Write;

// The reader maps whole files, so the fuzz input goes through a
// tempfile before it reaches the parser.
fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let mut file = tempfile::NamedTempFile::new().expect("create tempfile");
    file.write_all(data).expect("write fuzz input");

    if let Ok(reader) = PeReader::open(file.path(), false) {
        let _ = reader.is_valid_pe();
        let _ = reader.all_dll_imports();
        let _ = reader.resource_data("16/1");
    }
});
