#![no_main]

#[macro_use]
extern crate libfuzzer_sys;

use relay_message::DataUnescaper;

// Feeds arbitrarily-chopped input through `DataUnescaper` one chunk at a
// time, carrying the unhandled tail over to the next chunk as documented,
// and checks the unescaper never claims to have handled more bytes than it
// was given.
fuzz_target!(|data: Vec<Vec<u8>>| {
    let mut unescaper = DataUnescaper::new(true);
    let mut carry = Vec::new();
    for chunk in data {
        carry.extend_from_slice(&chunk);
        let res = unescaper.unescape(&mut carry);
        assert!(res.written <= res.unhandled_idx);
        assert!(res.unhandled_idx <= carry.len());
        carry.drain(..res.unhandled_idx);
    }
});
