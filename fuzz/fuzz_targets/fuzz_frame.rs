#![no_main]

use std::io::Cursor;

use libfuzzer_sys::fuzz_target;
use series_list::bridge::{FromFetcher, ToFetcher};
use series_list::frame::{self, read_frame, write_frame};

fuzz_target!(|data: &[u8]| {
    // Raw payloads: decoding must fail cleanly, never panic.
    let _ = frame::decode::<FromFetcher>(data);
    let _ = frame::decode::<ToFetcher>(data);

    // Framed stream: read until the first error or clean EOF.
    let mut stream = Cursor::new(data);
    while let Ok(Some(msg)) = read_frame::<_, FromFetcher>(&mut stream) {
        // Whatever decoded must survive a second trip unchanged in size.
        let mut buf = Vec::new();
        write_frame(&mut buf, &msg).expect("decoded frame must re-encode");
        let again: FromFetcher = frame::decode(&buf[4..]).expect("re-encoded frame must decode");
        let mut buf2 = Vec::new();
        write_frame(&mut buf2, &again).expect("decoded frame must re-encode");
        assert_eq!(buf, buf2);
    }
});
