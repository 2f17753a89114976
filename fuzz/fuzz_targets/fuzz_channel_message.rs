#![no_main]

use libfuzzer_sys::fuzz_target;

use confidential_inference_client::channel::wire::parse_message;
use confidential_inference_client::channel::ChannelEngine;
use confidential_inference_client::{ExpectedIdentity, SoftwareChannel};

fuzz_target!(|data: &[u8]| {
    let _ = parse_message(data);

    // A server message arriving while a key request is pending.
    let mut channel = SoftwareChannel::new(ExpectedIdentity::default());
    let _ = channel.make_key_request();
    let _ = channel.handle_message(data);
});
