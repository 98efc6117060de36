//! Fuzz target for control-plane message decoding
//!
//! Tests request and response decoding with arbitrary bytes:
//! - Length prefixes that lie about the body size
//! - Prefixes beyond the 1 MiB cap
//! - Malformed or type-confused CBOR
//!
//! The fuzzer should NEVER panic. Any message that decodes must re-encode to
//! a message that decodes to the same value.

#![no_main]

use exposure_proto::{ControlRequest, ControlResponse};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(request) = ControlRequest::decode(data) {
        let mut buf = Vec::new();
        request.encode(&mut buf).expect("decoded request must re-encode");
        assert_eq!(ControlRequest::decode(&buf).expect("re-encoded request must decode"), request);
    }

    if let Ok(response) = ControlResponse::decode(data) {
        let mut buf = Vec::new();
        response.encode(&mut buf).expect("decoded response must re-encode");
        assert_eq!(ControlResponse::decode(&buf).expect("re-encoded response must decode"), response);
    }
});
