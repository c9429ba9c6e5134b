//! Fixed-size record encoding.
//!
//! Every entry is a 24-byte record: kind tag, thread id and a 16-byte body
//! area. Integers are little-endian. Word-sized fields (addresses, lengths,
//! counters) take `size_of::<usize>()` bytes, so a log is only readable by a
//! build with the same word size. Unused body bytes are zero.

use crate::entry::{CallerClass, EntryBody, EntryKind, LogEntry, ReleaseTag, RELEASE_TAG_LEN};
use crate::error::LogError;
use bytes::{Buf, BufMut};
use rewind_core::{KernelTid, ThreadId};
use std::io::{self, Read};

/// Size of the fixed part of every record
pub const RECORD_SIZE: usize = HEADER_SIZE + BODY_SIZE;

/// Kind tag plus thread id
pub const HEADER_SIZE: usize = 8;

/// Kind-specific area
pub const BODY_SIZE: usize = 16;

const WORD: usize = std::mem::size_of::<usize>();

const _: () = assert!(2 * WORD <= BODY_SIZE);

/// Encode the fixed part of an entry
#[must_use]
pub fn encode(entry: &LogEntry) -> [u8; RECORD_SIZE] {
    let mut record = [0u8; RECORD_SIZE];
    {
        let mut buf = &mut record[..];
        buf.put_u32_le(entry.kind().tag());
        buf.put_u32_le(entry.thread.as_u32());
        encode_body(&entry.body, &mut buf);
    }
    record
}

fn encode_body(body: &EntryBody, buf: &mut &mut [u8]) {
    match *body {
        EntryBody::SyscallArgs { thread, sysno } => {
            buf.put_u32_le(thread.as_u32());
            buf.put_u32_le(sysno);
        }
        EntryBody::SyscallRet { value } => buf.put_u64_le(value),
        EntryBody::DispatchCounter { before, counter } => {
            put_word(buf, usize::from(before));
            put_word(buf, counter);
        }
        EntryBody::ThreadCreate { child, kernel_tid } => {
            buf.put_u32_le(child.as_u32());
            buf.put_u32_le(kernel_tid.as_u32());
        }
        EntryBody::Acquire { thread, class } => {
            buf.put_u32_le(thread.as_u32());
            buf.put_u32_le(class.to_wire());
        }
        EntryBody::Release { tag } => buf.put_slice(tag.as_bytes()),
        EntryBody::Timestamp { low, high } => {
            buf.put_u32_le(low);
            buf.put_u32_le(high);
        }
        EntryBody::ClientCmdline { len } => buf.put_u32_le(len),
        EntryBody::InitClientStack { stack_size, auxv } => {
            buf.put_u32_le(stack_size);
            // auxv sits at its natural word alignment
            buf.put_bytes(0, WORD - 4);
            put_word(buf, auxv);
        }
        EntryBody::InitMemLayout { vstart, stack_top } => {
            put_word(buf, vstart);
            put_word(buf, stack_top);
        }
        EntryBody::Data { len, addr } => {
            put_word(buf, len);
            put_word(buf, addr);
        }
        EntryBody::Snapshot { len } => put_word(buf, len),
    }
}

/// Decode the fixed part of an entry
///
/// # Errors
///
/// Returns error for an unknown kind tag or a field value the kind forbids
pub fn decode(record: &[u8; RECORD_SIZE]) -> Result<LogEntry, LogError> {
    let mut buf = &record[..];
    let tag = buf.get_u32_le();
    let kind = EntryKind::from_tag(tag).ok_or(LogError::UnknownKind(tag))?;
    let thread = ThreadId::from_raw(buf.get_u32_le());
    let body = decode_body(kind, &mut buf)?;
    Ok(LogEntry::new(thread, body))
}

fn decode_body(kind: EntryKind, buf: &mut &[u8]) -> Result<EntryBody, LogError> {
    let body = match kind {
        EntryKind::SyscallArgs => EntryBody::SyscallArgs {
            thread: ThreadId::from_raw(buf.get_u32_le()),
            sysno: buf.get_u32_le(),
        },
        EntryKind::SyscallRet => EntryBody::SyscallRet {
            value: buf.get_u64_le(),
        },
        EntryKind::DispatchCounter => {
            let before = match get_word(buf) {
                0 => false,
                1 => true,
                other => {
                    return Err(LogError::InvalidField {
                        kind,
                        field: "is_before",
                        value: other as u64,
                    });
                }
            };
            EntryBody::DispatchCounter {
                before,
                counter: get_word(buf),
            }
        }
        EntryKind::ThreadCreate => EntryBody::ThreadCreate {
            child: ThreadId::from_raw(buf.get_u32_le()),
            kernel_tid: KernelTid::from_raw(buf.get_u32_le()),
        },
        EntryKind::Acquire => {
            let thread = ThreadId::from_raw(buf.get_u32_le());
            let raw = buf.get_u32_le();
            let class = CallerClass::from_wire(raw).ok_or(LogError::InvalidField {
                kind,
                field: "caller_class",
                value: u64::from(raw),
            })?;
            EntryBody::Acquire { thread, class }
        }
        EntryKind::Release => {
            let mut tag = [0u8; RELEASE_TAG_LEN];
            buf.copy_to_slice(&mut tag);
            EntryBody::Release {
                tag: ReleaseTag::from_bytes(tag),
            }
        }
        EntryKind::Timestamp => EntryBody::Timestamp {
            low: buf.get_u32_le(),
            high: buf.get_u32_le(),
        },
        EntryKind::ClientCmdline => EntryBody::ClientCmdline {
            len: buf.get_u32_le(),
        },
        EntryKind::InitClientStack => {
            let stack_size = buf.get_u32_le();
            buf.advance(WORD - 4);
            EntryBody::InitClientStack {
                stack_size,
                auxv: get_word(buf),
            }
        }
        EntryKind::InitMemLayout => EntryBody::InitMemLayout {
            vstart: get_word(buf),
            stack_top: get_word(buf),
        },
        EntryKind::Data => EntryBody::Data {
            len: get_word(buf),
            addr: get_word(buf),
        },
        EntryKind::Snapshot => EntryBody::Snapshot { len: get_word(buf) },
    };
    Ok(body)
}

fn put_word(buf: &mut &mut [u8], value: usize) {
    buf.put_uint_le(value as u64, WORD);
}

fn get_word(buf: &mut &[u8]) -> usize {
    buf.get_uint_le(WORD) as usize
}

/// Read the next fixed record.
///
/// Returns `Ok(None)` when the reader is at a clean end of file.
///
/// # Errors
///
/// Returns error on I/O failure or when the file ends inside a record
pub fn read_record<R: Read + ?Sized>(reader: &mut R) -> Result<Option<[u8; RECORD_SIZE]>, LogError> {
    let mut record = [0u8; RECORD_SIZE];
    let mut filled = 0;
    while filled < RECORD_SIZE {
        match reader.read(&mut record[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    match filled {
        0 => Ok(None),
        RECORD_SIZE => Ok(Some(record)),
        found => Err(LogError::Truncated {
            expected: RECORD_SIZE,
            found,
        }),
    }
}

/// Read exactly `buf.len()` payload bytes.
///
/// # Errors
///
/// Returns error on I/O failure or when the file ends inside the payload
pub fn read_payload<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> Result<(), LogError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(LogError::Truncated {
                    expected: buf.len(),
                    found: filled,
                });
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_record_layout() {
        let entry = LogEntry::syscall_args(ThreadId::from_raw(2), 0x2A);
        let record = encode(&entry);
        assert_eq!(&record[0..4], &1u32.to_le_bytes());
        assert_eq!(&record[4..8], &2u32.to_le_bytes());
        assert_eq!(&record[8..12], &2u32.to_le_bytes());
        assert_eq!(&record[12..16], &0x2Au32.to_le_bytes());
        assert_eq!(&record[16..], &[0u8; 8]);
    }

    #[test]
    fn test_release_tag_layout() {
        let entry = LogEntry::release(ThreadId::MAIN, "exit_thread");
        let record = encode(&entry);
        assert_eq!(&record[8..19], b"exit_thread");
        assert_eq!(decode(&record).unwrap(), entry);
    }

    #[test]
    fn test_init_client_stack_alignment() {
        let entry = LogEntry::new(
            ThreadId::MAIN,
            EntryBody::InitClientStack {
                stack_size: 0x1234,
                auxv: 0xBEEF,
            },
        );
        let record = encode(&entry);
        let auxv_at = HEADER_SIZE + WORD;
        assert_eq!(
            &record[auxv_at..auxv_at + WORD],
            &0xBEEFusize.to_le_bytes()[..]
        );
        assert_eq!(decode(&record).unwrap(), entry);
    }

    #[test]
    fn test_decode_rejects_tag_zero() {
        let record = [0u8; RECORD_SIZE];
        assert!(matches!(decode(&record), Err(LogError::UnknownKind(0))));
    }

    #[test]
    fn test_decode_rejects_bad_class() {
        let mut record = encode(&LogEntry::acquire(ThreadId::MAIN, CallerClass::Normal));
        record[12..16].copy_from_slice(&7u32.to_le_bytes());
        assert!(matches!(
            decode(&record),
            Err(LogError::InvalidField { field: "caller_class", .. })
        ));
    }

    #[test]
    fn test_decode_rejects_bad_phase() {
        let entry = LogEntry::new(
            ThreadId::MAIN,
            EntryBody::DispatchCounter {
                before: true,
                counter: 9,
            },
        );
        let mut record = encode(&entry);
        record[HEADER_SIZE] = 5;
        assert!(matches!(
            decode(&record),
            Err(LogError::InvalidField { field: "is_before", .. })
        ));
    }

    #[test]
    fn test_read_record_eof() {
        let empty: &[u8] = &[];
        assert!(read_record(&mut &*empty).unwrap().is_none());

        let partial = [1u8; 10];
        let err = read_record(&mut &partial[..]).unwrap_err();
        assert!(matches!(err, LogError::Truncated { expected: 24, found: 10 }));
    }

    #[test]
    fn test_read_payload_short() {
        let data = [7u8; 3];
        let mut buf = [0u8; 4];
        let err = read_payload(&mut &data[..], &mut buf).unwrap_err();
        assert!(matches!(err, LogError::Truncated { expected: 4, found: 3 }));
    }

    pub(crate) fn arb_body() -> impl Strategy<Value = EntryBody> {
        let tid = (0u32..500).prop_map(ThreadId::from_raw);
        let class = prop_oneof![
            Just(CallerClass::Normal),
            Just(CallerClass::Preempt),
            Just(CallerClass::Unknown)
        ];
        let scheduling = prop_oneof![
            (tid.clone(), any::<u32>())
                .prop_map(|(thread, sysno)| EntryBody::SyscallArgs { thread, sysno }),
            any::<u64>().prop_map(|value| EntryBody::SyscallRet { value }),
            (any::<bool>(), any::<usize>())
                .prop_map(|(before, counter)| EntryBody::DispatchCounter { before, counter }),
            (tid.clone(), any::<u32>()).prop_map(|(child, k)| EntryBody::ThreadCreate {
                child,
                kernel_tid: KernelTid::from_raw(k),
            }),
            (tid, class).prop_map(|(thread, class)| EntryBody::Acquire { thread, class }),
        ];
        let rest = prop_oneof![
            any::<[u8; RELEASE_TAG_LEN]>().prop_map(|b| EntryBody::Release {
                tag: ReleaseTag::from_bytes(b),
            }),
            (any::<u32>(), any::<u32>()).prop_map(|(low, high)| EntryBody::Timestamp { low, high }),
            (0u32..4096).prop_map(|len| EntryBody::ClientCmdline { len }),
            (any::<u32>(), any::<usize>())
                .prop_map(|(stack_size, auxv)| EntryBody::InitClientStack { stack_size, auxv }),
            (any::<usize>(), any::<usize>())
                .prop_map(|(vstart, stack_top)| EntryBody::InitMemLayout { vstart, stack_top }),
            (0usize..256, any::<usize>()).prop_map(|(len, addr)| EntryBody::Data { len, addr }),
            (0usize..256).prop_map(|len| EntryBody::Snapshot { len }),
        ];
        prop_oneof![scheduling, rest]
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode(raw_thread in 0u32..500, body in arb_body()) {
            let entry = LogEntry::new(ThreadId::from_raw(raw_thread), body);
            let record = encode(&entry);
            prop_assert_eq!(decode(&record).unwrap(), entry);
        }

        #[test]
        fn prop_decode_never_panics(record in any::<[u8; RECORD_SIZE]>()) {
            let _ = decode(&record);
        }
    }
}
