#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;

use confidential_inference_client::tensor::codec::{decode_tensor_file, decode_tensor_map};

fuzz_target!(|data: &[u8]| {
    // ndims, dtype tag, shape overflow, name UTF-8, padding and data size are
    // all attacker-controlled; none may panic.
    let _ = decode_tensor_map(Bytes::copy_from_slice(data));
    let _ = decode_tensor_file(Bytes::copy_from_slice(data));
});
