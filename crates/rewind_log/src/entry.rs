//! Log entry types.
//!
//! A [`LogEntry`] is one nondeterministic event: the thread that produced it
//! plus a kind-specific [`EntryBody`]. Three kinds are followed by a raw byte
//! payload in the log whose length the body declares.

use rewind_core::{KernelTid, ThreadId};
use serde::{Deserialize, Serialize};

/// Width of the opaque caller tag carried by release entries
pub const RELEASE_TAG_LEN: usize = 16;

/// Longest client command line that can be recorded
pub const MAX_CMDLINE_LENGTH: usize = 4096;

/// Entry kind - the wire tag of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u32)]
pub enum EntryKind {
    SyscallArgs = 1,
    SyscallRet = 2,
    DispatchCounter = 3,
    ThreadCreate = 4,
    Acquire = 5,
    Release = 6,
    Timestamp = 7,
    ClientCmdline = 8,
    InitClientStack = 9,
    InitMemLayout = 10,
    /// Memory bytes whose address and length are both known before reading
    Data = 11,
    /// Opaque blob whose length alone is known before reading
    Snapshot = 12,
}

impl EntryKind {
    /// Every kind, in tag order
    pub const ALL: [Self; 12] = [
        Self::SyscallArgs,
        Self::SyscallRet,
        Self::DispatchCounter,
        Self::ThreadCreate,
        Self::Acquire,
        Self::Release,
        Self::Timestamp,
        Self::ClientCmdline,
        Self::InitClientStack,
        Self::InitMemLayout,
        Self::Data,
        Self::Snapshot,
    ];

    /// Wire tag
    #[must_use]
    pub const fn tag(self) -> u32 {
        self as u32
    }

    /// Kind for a wire tag, `None` for tag 0 and unknown tags
    #[must_use]
    pub fn from_tag(tag: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.tag() == tag)
    }

    /// Whether a raw payload follows the fixed record
    #[must_use]
    pub const fn has_payload(self) -> bool {
        matches!(self, Self::ClientCmdline | Self::Data | Self::Snapshot)
    }

    /// Short lowercase name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::SyscallArgs => "syscall_args",
            Self::SyscallRet => "syscall_ret",
            Self::DispatchCounter => "dispatch_counter",
            Self::ThreadCreate => "thread_create",
            Self::Acquire => "acquire",
            Self::Release => "release",
            Self::Timestamp => "timestamp",
            Self::ClientCmdline => "client_cmdline",
            Self::InitClientStack => "init_client_stack",
            Self::InitMemLayout => "init_mem_layout",
            Self::Data => "data",
            Self::Snapshot => "snapshot",
        }
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a thread asked for the execution token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallerClass {
    /// Ordinary scheduling
    Normal,
    /// Woken to handle a timer-expiry/kill preemption
    Preempt,
    /// Nothing scheduled yet
    Unknown,
}

impl CallerClass {
    /// Wire value
    #[must_use]
    pub const fn to_wire(self) -> u32 {
        match self {
            Self::Normal => 0,
            Self::Preempt => 1,
            Self::Unknown => u32::MAX,
        }
    }

    /// Class for a wire value
    #[must_use]
    pub const fn from_wire(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Normal),
            1 => Some(Self::Preempt),
            u32::MAX => Some(Self::Unknown),
            _ => None,
        }
    }
}

/// Opaque 16-byte tag naming the code path that gave up the execution token.
///
/// Built with C `strncpy` semantics: longer strings are cut, shorter ones
/// are zero-padded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ReleaseTag([u8; RELEASE_TAG_LEN]);

impl ReleaseTag {
    /// Tag used when a thread gives up the token for the last time
    pub const EXIT_THREAD: &'static str = "exit_thread";

    /// Create from a string
    #[must_use]
    pub fn new(who: &str) -> Self {
        let mut bytes = [0u8; RELEASE_TAG_LEN];
        let src = who.as_bytes();
        let len = src.len().min(RELEASE_TAG_LEN);
        bytes[..len].copy_from_slice(&src[..len]);
        Self(bytes)
    }

    /// Create from raw bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; RELEASE_TAG_LEN]) -> Self {
        Self(bytes)
    }

    /// Get as bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; RELEASE_TAG_LEN] {
        &self.0
    }

    /// Text up to the first NUL
    #[must_use]
    pub fn as_str(&self) -> std::borrow::Cow<'_, str> {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(RELEASE_TAG_LEN);
        String::from_utf8_lossy(&self.0[..end])
    }
}

impl std::fmt::Display for ReleaseTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_str())
    }
}

impl From<&str> for ReleaseTag {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ReleaseTag {
    fn from(value: String) -> Self {
        Self::new(&value)
    }
}

impl From<ReleaseTag> for String {
    fn from(value: ReleaseTag) -> Self {
        value.as_str().into_owned()
    }
}

/// Kind-specific fields of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryBody {
    /// A syscall is about to be handed to the kernel
    SyscallArgs {
        /// Thread issuing the call
        #[serde(rename = "caller")]
        thread: ThreadId,
        /// Syscall number
        sysno: u32,
    },
    /// Value returned by the kernel
    SyscallRet {
        /// Raw return value
        value: u64,
    },
    /// Dispatcher block counter sampled around a syscall
    DispatchCounter {
        /// Sampled before (true) or after (false) the syscall
        before: bool,
        /// Counter value
        counter: usize,
    },
    /// A new thread was created
    ThreadCreate {
        /// Slot of the child
        child: ThreadId,
        /// Identifier the kernel gave the child
        kernel_tid: KernelTid,
    },
    /// A thread obtained the execution token
    Acquire {
        /// Thread that got the token
        #[serde(rename = "holder")]
        thread: ThreadId,
        /// Why it asked
        class: CallerClass,
    },
    /// A thread gave up the execution token
    Release {
        /// Which code path released it
        tag: ReleaseTag,
    },
    /// Privileged timestamp counter read
    Timestamp {
        /// Low 32 bits
        low: u32,
        /// High 32 bits
        high: u32,
    },
    /// Client program name and arguments
    ClientCmdline {
        /// Length of the payload
        len: u32,
    },
    /// Initial client stack image
    InitClientStack {
        /// Bytes between the initial stack pointer and the stack top
        stack_size: u32,
        /// Address of the auxiliary vector
        auxv: usize,
    },
    /// Initial memory layout
    InitMemLayout {
        /// Start of the address-space manager's region
        vstart: usize,
        /// Highest byte of the client stack
        stack_top: usize,
    },
    /// Memory written by a syscall, or the initial stack
    Data {
        /// Length of the payload
        len: usize,
        /// Client address the bytes belong to, kept for inspection only
        addr: usize,
    },
    /// Register snapshot or other opaque blob
    Snapshot {
        /// Length of the payload
        len: usize,
    },
}

impl EntryBody {
    /// Wire kind of this body
    #[must_use]
    pub const fn kind(&self) -> EntryKind {
        match self {
            Self::SyscallArgs { .. } => EntryKind::SyscallArgs,
            Self::SyscallRet { .. } => EntryKind::SyscallRet,
            Self::DispatchCounter { .. } => EntryKind::DispatchCounter,
            Self::ThreadCreate { .. } => EntryKind::ThreadCreate,
            Self::Acquire { .. } => EntryKind::Acquire,
            Self::Release { .. } => EntryKind::Release,
            Self::Timestamp { .. } => EntryKind::Timestamp,
            Self::ClientCmdline { .. } => EntryKind::ClientCmdline,
            Self::InitClientStack { .. } => EntryKind::InitClientStack,
            Self::InitMemLayout { .. } => EntryKind::InitMemLayout,
            Self::Data { .. } => EntryKind::Data,
            Self::Snapshot { .. } => EntryKind::Snapshot,
        }
    }

    /// Declared length of the trailing payload, 0 for kinds without one
    #[must_use]
    pub const fn payload_len(&self) -> usize {
        match self {
            Self::ClientCmdline { len } => *len as usize,
            Self::Data { len, .. } | Self::Snapshot { len } => *len,
            _ => 0,
        }
    }
}

/// One record of the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Thread that produced (record) or consumes (replay) the entry
    pub thread: ThreadId,
    /// Kind-specific fields
    #[serde(flatten)]
    pub body: EntryBody,
}

impl LogEntry {
    /// Create a new entry
    #[must_use]
    pub const fn new(thread: ThreadId, body: EntryBody) -> Self {
        Self { thread, body }
    }

    /// Wire kind
    #[must_use]
    pub const fn kind(&self) -> EntryKind {
        self.body.kind()
    }

    /// Declared length of the trailing payload
    #[must_use]
    pub const fn payload_len(&self) -> usize {
        self.body.payload_len()
    }

    /// Syscall-args entry
    #[must_use]
    pub const fn syscall_args(thread: ThreadId, sysno: u32) -> Self {
        Self::new(thread, EntryBody::SyscallArgs { thread, sysno })
    }

    /// Syscall-return entry; the value is filled in by replay
    #[must_use]
    pub const fn syscall_ret(thread: ThreadId, value: u64) -> Self {
        Self::new(thread, EntryBody::SyscallRet { value })
    }

    /// Release entry
    #[must_use]
    pub fn release(thread: ThreadId, tag: impl Into<ReleaseTag>) -> Self {
        Self::new(thread, EntryBody::Release { tag: tag.into() })
    }

    /// Acquire entry. Scheduling entries carry no header thread.
    #[must_use]
    pub const fn acquire(thread: ThreadId, class: CallerClass) -> Self {
        Self::new(ThreadId::INVALID, EntryBody::Acquire { thread, class })
    }

    /// Memory data entry of `len` bytes at `addr`
    #[must_use]
    pub const fn data(thread: ThreadId, len: usize, addr: usize) -> Self {
        Self::new(thread, EntryBody::Data { len, addr })
    }

    /// Snapshot entry of `len` bytes
    #[must_use]
    pub const fn snapshot(thread: ThreadId, len: usize) -> Self {
        Self::new(thread, EntryBody::Snapshot { len })
    }
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.thread, self.kind())?;
        match &self.body {
            EntryBody::SyscallArgs { sysno, .. } => write!(f, " sysno={}", sysno),
            EntryBody::SyscallRet { value } => write!(f, " ret=0x{:X}", value),
            EntryBody::DispatchCounter { before, counter } => write!(
                f,
                " {} ctr={}",
                if *before { "before" } else { "after" },
                counter
            ),
            EntryBody::ThreadCreate { child, kernel_tid } => {
                write!(f, " child={} {}", child, kernel_tid)
            }
            EntryBody::Acquire { thread, class } => write!(f, " -> {} ({:?})", thread, class),
            EntryBody::Release { tag } => write!(f, " who={}", tag),
            EntryBody::Timestamp { low, high } => {
                write!(f, " tsc=0x{:08X}{:08X}", high, low)
            }
            EntryBody::ClientCmdline { len } => write!(f, " len={}", len),
            EntryBody::InitClientStack { stack_size, auxv } => {
                write!(f, " stksz={} auxv=0x{:X}", stack_size, auxv)
            }
            EntryBody::InitMemLayout { vstart, stack_top } => {
                write!(f, " vstart=0x{:X} clstk_top=0x{:X}", vstart, stack_top)
            }
            EntryBody::Data { len, addr } => write!(f, " len={} addr=0x{:X}", len, addr),
            EntryBody::Snapshot { len } => write!(f, " len={}", len),
        }
    }
}
