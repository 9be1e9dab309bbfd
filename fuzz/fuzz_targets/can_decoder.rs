#![no_main]

use bms_can_decoder::can_frame::CanFrame;
use bms_can_decoder::{decode_frame, Decoded, TelemetryCache};
use libfuzzer_sys::fuzz_target;

// Dispatching and caching must not panic for any input
fuzz_target!(|frames: Vec<CanFrame>| {
    let mut cache = TelemetryCache::new();
    for frame in &frames {
        if let Decoded::Message(data) = decode_frame(frame, &mut cache) {
            let _ = data.to_string();
        }
    }
});
