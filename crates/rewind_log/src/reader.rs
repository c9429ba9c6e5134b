//! Replay-mode log reader.
//!
//! The caller builds a template entry holding what it already knows (kind,
//! thread, and for some kinds a syscall number, release tag or payload
//! length). The reader pulls the next record, checks it against the template
//! and hands back the template with the recorded values filled in. Reads are
//! strictly sequential; the file order is the replayed event order.

use crate::encoding::{decode, read_payload, read_record};
use crate::entry::{EntryBody, EntryKind, LogEntry, MAX_CMDLINE_LENGTH};
use crate::error::Desync;
use rewind_core::{ThreadId, MAX_THREAD_SLOTS};
use std::io::Read;

/// Checking reader over a recorded log
pub struct ReplayReader<R> {
    inner: R,
    resolved: u64,
}

impl<R: Read> ReplayReader<R> {
    /// Create a new reader positioned at the start of the log
    #[must_use]
    pub fn new(inner: R) -> Self {
        Self { inner, resolved: 0 }
    }

    /// Resolve an entry that carries no payload.
    ///
    /// # Errors
    ///
    /// Returns [`Desync`] if the next record disagrees with the template, the
    /// log ends, or the template's kind carries a payload
    pub fn resolve(&mut self, template: LogEntry) -> Result<LogEntry, Desync> {
        if template.kind().has_payload() {
            return Err(Desync::WrongResolver {
                kind: template.kind(),
                method: "resolve",
            });
        }
        let recorded = self.next_record()?;
        merge(template, recorded)
    }

    /// Resolve a `Data` or `Snapshot` entry and read its payload into `buf`.
    ///
    /// `buf` must be exactly as long as the template declares, and the
    /// recorded length must match both. Nothing is read on a length mismatch
    /// detected before the record.
    ///
    /// # Errors
    ///
    /// Returns [`Desync`] on any length disagreement, a record mismatch or a
    /// short payload
    pub fn resolve_data(&mut self, template: LogEntry, buf: &mut [u8]) -> Result<LogEntry, Desync> {
        let kind = template.kind();
        if !matches!(kind, EntryKind::Data | EntryKind::Snapshot) {
            return Err(Desync::WrongResolver {
                kind,
                method: "resolve_data",
            });
        }
        let declared = template.payload_len();
        if buf.len() != declared {
            return Err(Desync::BufferLength {
                kind,
                declared,
                buffer: buf.len(),
            });
        }

        let recorded = self.next_record()?;
        let entry = merge(template, recorded)?;
        read_payload(&mut self.inner, buf)?;
        Ok(entry)
    }

    /// Resolve the client command line entry.
    ///
    /// The length is only known from the log, so the buffer is allocated
    /// here and handed to the caller.
    ///
    /// # Errors
    ///
    /// Returns [`Desync`] on a record mismatch, a recorded length outside
    /// `1..MAX_CMDLINE_LENGTH` or a short payload
    pub fn resolve_cmdline(&mut self, template: LogEntry) -> Result<(LogEntry, Vec<u8>), Desync> {
        if template.kind() != EntryKind::ClientCmdline {
            return Err(Desync::WrongResolver {
                kind: template.kind(),
                method: "resolve_cmdline",
            });
        }
        let recorded = self.next_record()?;
        let entry = merge(template, recorded)?;

        let len = entry.payload_len();
        if len == 0 || len >= MAX_CMDLINE_LENGTH {
            return Err(Desync::CmdlineLength { len: len as u32 });
        }
        let mut buf = vec![0u8; len];
        read_payload(&mut self.inner, &mut buf)?;
        Ok((entry, buf))
    }

    /// Entries resolved so far
    #[must_use]
    pub const fn resolved(&self) -> u64 {
        self.resolved
    }

    /// Consume and return the underlying reader
    pub fn into_inner(self) -> R {
        self.inner
    }

    fn next_record(&mut self) -> Result<LogEntry, Desync> {
        let record = read_record(&mut self.inner)?.ok_or(Desync::EndOfLog)?;
        let entry = decode(&record)?;
        self.resolved += 1;
        tracing::trace!(entry = %entry, "read log entry");
        Ok(entry)
    }
}

/// Check `recorded` against `template` and fill the fields the log owns.
fn merge(template: LogEntry, recorded: LogEntry) -> Result<LogEntry, Desync> {
    let kind = template.kind();
    if recorded.kind() != kind {
        return Err(Desync::KindMismatch {
            expected: kind,
            recorded: recorded.kind(),
        });
    }
    if recorded.thread != template.thread {
        return Err(Desync::ThreadMismatch {
            kind,
            expected: template.thread,
            recorded: recorded.thread,
        });
    }

    let body = match (template.body, recorded.body) {
        (
            EntryBody::SyscallArgs { thread, sysno },
            EntryBody::SyscallArgs {
                thread: recorded_thread,
                sysno: recorded_sysno,
            },
        ) => {
            if sysno != recorded_sysno {
                return Err(Desync::SyscallMismatch {
                    expected: sysno,
                    recorded: recorded_sysno,
                });
            }
            if thread != recorded_thread {
                return Err(Desync::ThreadMismatch {
                    kind,
                    expected: thread,
                    recorded: recorded_thread,
                });
            }
            template.body
        }
        (EntryBody::Release { tag }, EntryBody::Release { tag: recorded_tag }) => {
            if tag != recorded_tag {
                return Err(Desync::ReleaseTagMismatch {
                    expected: tag,
                    recorded: recorded_tag,
                });
            }
            template.body
        }
        (
            EntryBody::DispatchCounter { before, .. },
            EntryBody::DispatchCounter {
                before: recorded_before,
                counter,
            },
        ) => {
            if before != recorded_before {
                return Err(Desync::DispatchPhaseMismatch {
                    expected: before,
                    recorded: recorded_before,
                });
            }
            EntryBody::DispatchCounter { before, counter }
        }
        (EntryBody::ThreadCreate { .. }, body @ EntryBody::ThreadCreate { child, .. }) => {
            check_slot(child)?;
            body
        }
        (EntryBody::Acquire { .. }, body @ EntryBody::Acquire { thread, .. }) => {
            check_slot(thread)?;
            body
        }
        (EntryBody::Data { len, .. }, EntryBody::Data { len: recorded_len, .. })
        | (EntryBody::Snapshot { len }, EntryBody::Snapshot { len: recorded_len }) => {
            if len != recorded_len {
                return Err(Desync::LengthMismatch {
                    kind,
                    expected: len,
                    recorded: recorded_len,
                });
            }
            template.body
        }
        (EntryBody::SyscallRet { .. }, body @ EntryBody::SyscallRet { .. })
        | (EntryBody::Timestamp { .. }, body @ EntryBody::Timestamp { .. })
        | (EntryBody::ClientCmdline { .. }, body @ EntryBody::ClientCmdline { .. })
        | (EntryBody::InitClientStack { .. }, body @ EntryBody::InitClientStack { .. })
        | (EntryBody::InitMemLayout { .. }, body @ EntryBody::InitMemLayout { .. }) => body,
        (_, body) => {
            return Err(Desync::KindMismatch {
                expected: kind,
                recorded: body.kind(),
            });
        }
    };

    Ok(LogEntry::new(template.thread, body))
}

fn check_slot(thread: ThreadId) -> Result<(), Desync> {
    if thread.slot() < MAX_THREAD_SLOTS {
        Ok(())
    } else {
        Err(Desync::SlotOutOfRange {
            slot: thread.as_u32(),
        })
    }
}
