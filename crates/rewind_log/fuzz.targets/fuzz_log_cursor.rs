#![no_main]
use libfuzzer_sys::fuzz_target;
use rewind_log::LogCursor;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes must never panic the cursor, and it must terminate
    let mut offset = 0;
    for entry in LogCursor::new(data).take(4096) {
        match entry {
            Ok(recorded) => {
                assert_eq!(recorded.offset, offset);
                offset += (rewind_log::RECORD_SIZE + recorded.payload.len()) as u64;
            }
            Err(_) => break,
        }
    }
});
