#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        // Decoding must never panic, and decoded messages must re-encode.
        if let Ok(message) = mosaic_ir::BlockSummaryMessage::from_json(s) {
            let _ = message.status();
            let _ = message.payload().visited();
            let reencoded = mosaic_ir::BlockSummaryMessage::from_json(&message.to_json());
            assert_eq!(reencoded.ok().as_ref(), Some(&message));
        }
    }
});
