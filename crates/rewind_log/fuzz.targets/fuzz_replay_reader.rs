#![no_main]
use libfuzzer_sys::fuzz_target;
use rewind_core::ThreadId;
use rewind_log::{CallerClass, LogEntry, ReplayReader};

fuzz_target!(|data: &[u8]| {
    // The scheduling lookahead is the hottest path of replay; a corrupt log
    // must surface as a Desync, never a panic.
    let mut reader = ReplayReader::new(data);
    for _ in 0..1024 {
        let template = LogEntry::acquire(ThreadId::INVALID, CallerClass::Unknown);
        if reader.resolve(template).is_err() {
            break;
        }
        if reader
            .resolve(LogEntry::release(ThreadId::MAIN, "sched"))
            .is_err()
        {
            break;
        }
    }
});
