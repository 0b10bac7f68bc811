#![no_main]
use std::time::Duration;

use libfuzzer_sys::fuzz_target;
use velo_core::mocks::MemoryLink;
use velo_core::wire::{CommandRecord, Record, SampleRecord, recv_record, try_recv_record};
use velo_traits::Transport;

// Arbitrary bytes split into arbitrary chunks: decoding either yields a record
// or a typed link error, and a decoded record re-encodes to the same bytes.
fuzz_target!(|input: (Vec<u8>, Vec<u8>)| {
    let (bytes, cuts) = input;
    let (tx, rx) = MemoryLink::pair();
    let mut rest = bytes.as_slice();
    for c in cuts.iter().map(|&c| usize::from(c % 9)) {
        if rest.is_empty() {
            break;
        }
        let (head, tail) = rest.split_at(c.min(rest.len()));
        if !head.is_empty() {
            let _ = tx.send(head, Duration::ZERO);
        }
        rest = tail;
    }
    if !rest.is_empty() {
        let _ = tx.send(rest, Duration::ZERO);
    }

    if let Ok(rec) = recv_record::<SampleRecord, _>(&rx, Duration::from_millis(1)) {
        let (buf, len) = rec.encode();
        assert_eq!(SampleRecord::decode(&buf[..len]), Ok(rec));
    }
    while let Ok(Some(cmd)) = try_recv_record::<CommandRecord, _>(&rx, Duration::from_millis(1)) {
        let (buf, len) = cmd.encode();
        assert_eq!(&buf[..len], &cmd.control.to_le_bytes());
    }
});
