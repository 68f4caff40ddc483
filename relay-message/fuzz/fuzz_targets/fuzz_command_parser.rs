#![no_main]

#[macro_use]
extern crate libfuzzer_sys;

use relay_message::Command;

fuzz_target!(|data: &[u8]| {
    let _ = Command::parse(data);
});
