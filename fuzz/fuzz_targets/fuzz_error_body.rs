#![no_main]

use libfuzzer_sys::fuzz_target;

use confidential_inference_client::RequestError;

fuzz_target!(|data: &[u8]| {
    let body = String::from_utf8_lossy(data);
    let err = RequestError::from_body(400, &body);
    let _ = err.to_string();
});
