#![no_main]

#[macro_use]
extern crate libfuzzer_sys;

use relay_message::Reply;

fuzz_target!(|data: &[u8]| {
    let _ = Reply::parse(data);
});
