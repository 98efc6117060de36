//! Fuzz target for ObservedBeacon::parse
//!
//! Inbound frames come from any nearby device. The parser must never panic:
//! short frames are errors, everything at least 27 bytes long parses.

#![no_main]

use exposure_proto::{MIN_FRAME_SIZE, ObservedBeacon};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    match ObservedBeacon::parse(data) {
        Ok(beacon) => {
            assert!(data.len() >= MIN_FRAME_SIZE);
            assert_eq!(beacon.rpi.as_bytes()[..], data[11..27]);
            assert_eq!(beacon.aem[..], data[27..]);
        },
        Err(_) => assert!(data.len() < MIN_FRAME_SIZE),
    }
});
