#![no_main]
use libfuzzer_sys::fuzz_target;
use rewind_log::encoding::{decode, encode, RECORD_SIZE};

fuzz_target!(|data: &[u8]| {
    let Ok(record) = <[u8; RECORD_SIZE]>::try_from(data) else {
        return;
    };
    // Any record that decodes must encode back to an equivalent entry
    if let Ok(entry) = decode(&record) {
        let again = decode(&encode(&entry)).expect("re-encoded record decodes");
        assert_eq!(entry, again);
    }
});
