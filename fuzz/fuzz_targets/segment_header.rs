#![no_main]

use alpha_bus::fuzz_validate_header;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    fuzz_validate_header(data);
});
