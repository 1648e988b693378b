#[macro_use]
extern crate afl;
use std::str::FromStr;

use tanglegram::Trytes;
use tanglegram::codec::decode_key_announcement;

fn main() {
    fuzz!(|data: &[u8]| {
        if let Ok(text) = std::str::from_utf8(data) {
            if let Ok(trytes) = Trytes::from_str(text) {
                let _ = decode_key_announcement(&trytes);
            }
        }
    });
}
