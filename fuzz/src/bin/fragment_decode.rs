#[macro_use]
extern crate afl;
use std::str::FromStr;

use tanglegram::Trytes;
use tanglegram::codec::{ChatFragment, pair_fragments};

fn main() {
    fuzz!(|data: &[u8]| {
        if let Ok(text) = std::str::from_utf8(data) {
            if let Ok(trytes) = Trytes::from_str(text) {
                if let Ok(fragment) = ChatFragment::decode(&trytes) {
                    let _ = pair_fragments(vec![(0usize, fragment)]);
                }
            }
        }
    });
}
