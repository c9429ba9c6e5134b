//! Record/replay session.
//!
//! A [`Session`] owns the log and every piece of engine state: the schedule,
//! the thread identity map, the register verifier and the divergence
//! counters. Once threads run, it lives inside an
//! [`ExecutionToken`](crate::ExecutionToken) and is only reached through the
//! guard of the thread holding the token.
//!
//! Every entry point is a no-op in [`RrMode::Inactive`]. In record mode it
//! logs what the live run did; in replay mode it reads the same entry back
//! and feeds the recorded values to the caller.

use crate::cmdline::ClientCommandLine;
use crate::error::{EngineError, EngineResult};
use crate::exit::ExitProbe;
use crate::identity::IdentityMap;
use crate::initimg::{is_page_aligned, page_round_down, GuestMemory, StackImage};
use crate::schedule::{Admission, ScheduleState};
use crate::verifier::{GuestStateVerifier, RegisterLayout};
use rewind_core::{CoreError, KernelTid, RrConfig, RrMode, ThreadId};
use rewind_log::{
    CallerClass, Desync, Durable, EntryBody, LogEntry, RecordWriter, ReleaseTag, ReplayReader,
    MAX_CMDLINE_LENGTH,
};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::sync::Arc;

/// Byte sink a recording session writes to
pub trait LogSink: Write + Durable + Send {}

impl<T: Write + Durable + Send> LogSink for T {}

/// Where log entries go, or come from
pub enum LogChannel {
    /// No log
    Inactive,
    /// Appending
    Record(RecordWriter<Box<dyn LogSink>>),
    /// Reading back
    Replay(ReplayReader<Box<dyn Read + Send>>),
    /// Session closed
    Closed,
}

impl LogChannel {
    /// Push `template` through the log: append it when recording, resolve
    /// it when replaying.
    fn process(&mut self, template: LogEntry) -> EngineResult<LogEntry> {
        match self {
            Self::Inactive => Ok(template),
            Self::Record(writer) => {
                writer.append(&template, &[])?;
                Ok(template)
            }
            Self::Replay(reader) => Ok(reader.resolve(template)?),
            Self::Closed => Err(EngineError::Closed),
        }
    }

    /// Like [`Self::process`] for entries followed by `buf`. Recording
    /// writes `buf`; replaying overwrites it with the recorded bytes.
    fn process_data(&mut self, template: LogEntry, buf: &mut [u8]) -> EngineResult<LogEntry> {
        match self {
            Self::Inactive => Ok(template),
            Self::Record(writer) => {
                writer.append(&template, buf)?;
                Ok(template)
            }
            Self::Replay(reader) => Ok(reader.resolve_data(template, buf)?),
            Self::Closed => Err(EngineError::Closed),
        }
    }

    fn entries(&self) -> u64 {
        match self {
            Self::Record(writer) => writer.appended(),
            Self::Replay(reader) => reader.resolved(),
            Self::Inactive | Self::Closed => 0,
        }
    }
}

/// Soft divergences seen during replay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DivergenceStats {
    /// Register snapshot comparisons with at least one mismatching field
    pub guest_state: u64,
    /// Dispatch counter samples that differed from the log
    pub dispatch_counter: u64,
}

impl DivergenceStats {
    /// All divergences
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.guest_state + self.dispatch_counter
    }
}

/// What a session did, reported when it closes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Session mode
    pub mode: RrMode,
    /// Entries written or read
    pub entries: u64,
    /// Soft divergences
    pub divergence: DivergenceStats,
}

impl SessionSummary {
    /// Serialize to JSON
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// A record or replay session
pub struct Session {
    config: RrConfig,
    channel: LogChannel,
    running: ThreadId,
    schedule: ScheduleState,
    identities: IdentityMap,
    verifier: GuestStateVerifier,
    dispatch_mismatches: u64,
    cmdline: Option<Vec<u8>>,
    summary: Option<SessionSummary>,
}

impl Session {
    /// Open the log named by `config` and start a session.
    ///
    /// Recording creates or truncates the log, readable by the owner only.
    /// Replaying opens it read-only.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LogOpen`] if the log cannot be opened
    pub fn open(config: RrConfig) -> EngineResult<Self> {
        let channel = match config.mode {
            RrMode::Inactive => LogChannel::Inactive,
            RrMode::Record => {
                let file = create_log(&config)?;
                LogChannel::Record(RecordWriter::new(Box::new(file)))
            }
            RrMode::Replay => {
                let file = File::open(&config.log_path).map_err(|e| log_open_error(&config, &e))?;
                LogChannel::Replay(ReplayReader::new(Box::new(BufReader::new(file))))
            }
        };
        tracing::info!(
            mode = %config.mode,
            log = %config.log_path.display(),
            "record/replay session opened"
        );
        Ok(Self::with_channel(config, channel))
    }

    /// Record into an arbitrary sink
    #[must_use]
    pub fn recording(sink: impl LogSink + 'static, mut config: RrConfig) -> Self {
        config.mode = RrMode::Record;
        Self::with_channel(config, LogChannel::Record(RecordWriter::new(Box::new(sink))))
    }

    /// Replay from an arbitrary source
    #[must_use]
    pub fn replaying(source: impl Read + Send + 'static, mut config: RrConfig) -> Self {
        config.mode = RrMode::Replay;
        Self::with_channel(config, LogChannel::Replay(ReplayReader::new(Box::new(source))))
    }

    /// Session that neither records nor replays
    #[must_use]
    pub fn inactive() -> Self {
        Self::with_channel(RrConfig::default(), LogChannel::Inactive)
    }

    fn with_channel(config: RrConfig, channel: LogChannel) -> Self {
        let verifier = GuestStateVerifier::new(RegisterLayout::default(), config.mismatch_report_limit);
        Self {
            config,
            channel,
            running: ThreadId::INVALID,
            schedule: ScheduleState::new(),
            identities: IdentityMap::new(),
            verifier,
            dispatch_mismatches: 0,
            cmdline: None,
            summary: None,
        }
    }

    /// Compare register state with another layout
    #[must_use]
    pub fn with_register_layout(mut self, layout: RegisterLayout) -> Self {
        self.verifier = GuestStateVerifier::new(layout, self.config.mismatch_report_limit);
        self
    }

    /// Session mode
    #[must_use]
    pub const fn mode(&self) -> RrMode {
        self.config.mode
    }

    /// Session configuration
    #[must_use]
    pub const fn config(&self) -> &RrConfig {
        &self.config
    }

    /// Thread holding the execution token, [`ThreadId::INVALID`] if none
    #[must_use]
    pub const fn running(&self) -> ThreadId {
        self.running
    }

    /// Scheduling state
    #[must_use]
    pub const fn schedule(&self) -> &ScheduleState {
        &self.schedule
    }

    /// Thread identity map
    #[must_use]
    pub const fn identities(&self) -> &IdentityMap {
        &self.identities
    }

    /// Soft divergences so far
    #[must_use]
    pub const fn divergence(&self) -> DivergenceStats {
        DivergenceStats {
            guest_state: self.verifier.diverged(),
            dispatch_counter: self.dispatch_mismatches,
        }
    }

    /// Whether [`Self::close`] has run
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.summary.is_some()
    }

    /// Close the log and report. Closing again returns the same summary.
    pub fn close(&mut self) -> SessionSummary {
        if let Some(summary) = self.summary {
            return summary;
        }

        if let LogChannel::Record(writer) = &mut self.channel
            && let Err(e) = writer.barrier()
        {
            tracing::warn!(error = %e, "final log sync failed");
        }
        let summary = SessionSummary {
            mode: self.mode(),
            entries: self.channel.entries(),
            divergence: self.divergence(),
        };
        self.channel = LogChannel::Closed;
        self.cmdline = None;
        self.summary = Some(summary);

        if self.mode().is_replay() {
            tracing::info!(
                "REPLAY -- number of guest state mismatch: {}",
                summary.divergence.guest_state
            );
        }
        tracing::info!(
            mode = %summary.mode,
            entries = summary.entries,
            dispatch_counter_mismatches = summary.divergence.dispatch_counter,
            "record/replay session closed"
        );
        summary
    }

    /// Capture (record) or restore (replay) the client command line.
    ///
    /// Replay returns the recorded command line and ignores the arguments.
    ///
    /// # Errors
    ///
    /// Returns error if the joined command line is too long to record, or
    /// on a log failure
    pub fn client_cmdline(&mut self, exe: &str, args: &[String]) -> EngineResult<ClientCommandLine> {
        let live = ClientCommandLine::new(exe, args.iter().cloned());
        match &mut self.channel {
            LogChannel::Inactive => Ok(live),
            LogChannel::Record(writer) => {
                let text = live.to_string();
                if text.len() >= MAX_CMDLINE_LENGTH {
                    return Err(EngineError::CmdlineTooLong {
                        len: text.len(),
                        limit: MAX_CMDLINE_LENGTH,
                    });
                }
                let entry = LogEntry::new(
                    self.running,
                    EntryBody::ClientCmdline {
                        len: text.len() as u32,
                    },
                );
                writer.append(&entry, text.as_bytes())?;
                Ok(live)
            }
            LogChannel::Replay(reader) => {
                let template = LogEntry::new(self.running, EntryBody::ClientCmdline { len: 0 });
                let (_, buf) = reader.resolve_cmdline(template)?;
                let recorded = ClientCommandLine::parse(&buf);
                tracing::debug!(cmdline = %recorded, "restored client command line");
                self.cmdline = Some(buf);
                Ok(recorded)
            }
            LogChannel::Closed => Err(EngineError::Closed),
        }
    }

    /// Note a new thread.
    ///
    /// Returns the kernel id to show the client: the live one when
    /// recording, the recorded one when replaying. Replay also remembers
    /// both ids in the child's slot.
    ///
    /// # Errors
    ///
    /// Returns error if `parent` is not running, the child slot is invalid
    /// or occupied, or on a log failure
    pub fn thread_create(&mut self, parent: ThreadId, child: ThreadId, kernel_tid: KernelTid) -> EngineResult<KernelTid> {
        if !self.mode().is_active() {
            return Ok(kernel_tid);
        }
        self.check_running(parent)?;

        let template = LogEntry::new(self.running, EntryBody::ThreadCreate { child, kernel_tid });
        let resolved = self.channel.process(template)?;
        if !self.mode().is_replay() {
            return Ok(kernel_tid);
        }

        let EntryBody::ThreadCreate {
            kernel_tid: recorded,
            ..
        } = resolved.body
        else {
            return Ok(kernel_tid);
        };
        self.identities.create(child, recorded, kernel_tid)?;
        tracing::debug!(
            child = %child,
            recorded = %recorded,
            kernel = %kernel_tid,
            "thread created"
        );
        Ok(recorded)
    }

    /// Log the syscall about to be issued, then snapshot or compare the
    /// register state.
    ///
    /// # Errors
    ///
    /// Returns error if `thread` is not running, the syscall differs from
    /// the recorded one, or on a log failure
    pub fn syscall_args(&mut self, thread: ThreadId, sysno: u32, regs: &[u8]) -> EngineResult<()> {
        if !self.mode().is_active() {
            return Ok(());
        }
        self.check_running(thread)?;
        self.channel.process(LogEntry::syscall_args(thread, sysno))?;
        self.snapshot_or_compare(regs)
    }

    /// Record the value the kernel returned, or replace it with the
    /// recorded one.
    ///
    /// # Errors
    ///
    /// Returns error on a log failure or desync
    pub fn syscall_ret(&mut self, ret: &mut u64) -> EngineResult<()> {
        if !self.mode().is_active() {
            return Ok(());
        }
        let resolved = self.channel.process(LogEntry::syscall_ret(self.running, *ret))?;
        if let EntryBody::SyscallRet { value } = resolved.body {
            *ret = value;
        }
        Ok(())
    }

    /// Record the memory a syscall wrote, or write the recorded bytes back.
    /// One entry per region, in order.
    ///
    /// # Errors
    ///
    /// Returns error on a log failure or a length desync
    pub fn syscall_mem(&mut self, regions: &mut [&mut [u8]]) -> EngineResult<()> {
        if !self.mode().is_active() {
            return Ok(());
        }
        for region in regions.iter_mut() {
            let entry = LogEntry::data(self.running, region.len(), region.as_ptr() as usize);
            self.channel.process_data(entry, region)?;
        }
        Ok(())
    }

    /// Cross-check the dispatcher block counter around a syscall.
    ///
    /// A counter that differs from the log is a soft divergence; sampling
    /// on the wrong side of the syscall is a desync.
    ///
    /// # Errors
    ///
    /// Returns error on a log failure or a phase desync
    pub fn dispatch_counter(&mut self, counter: usize, is_before: bool) -> EngineResult<()> {
        if !self.mode().is_active() {
            return Ok(());
        }
        let template = LogEntry::new(
            self.running,
            EntryBody::DispatchCounter {
                before: is_before,
                counter,
            },
        );
        let resolved = self.channel.process(template)?;
        if let EntryBody::DispatchCounter {
            counter: recorded, ..
        } = resolved.body
            && recorded != counter
        {
            if self.dispatch_mismatches < self.config.mismatch_report_limit {
                tracing::warn!(
                    thread = %self.running,
                    phase = if is_before { "before" } else { "after" },
                    "Syscall dispatch counter not expected. runtime/recorded={}/{}",
                    counter,
                    recorded
                );
            }
            self.dispatch_mismatches += 1;
        }
        Ok(())
    }

    /// Record, or restore, the start of the address-space manager's region
    /// and the client stack top.
    ///
    /// # Errors
    ///
    /// Returns error if either value is misaligned, or on a log failure
    pub fn init_mem_layout(&mut self, vstart: &mut usize, stack_top: &mut usize) -> EngineResult<()> {
        if !self.mode().is_active() {
            return Ok(());
        }
        let template = LogEntry::new(
            self.running,
            EntryBody::InitMemLayout {
                vstart: *vstart,
                stack_top: *stack_top,
            },
        );
        let resolved = self.channel.process(template)?;
        let EntryBody::InitMemLayout {
            vstart: logged_vstart,
            stack_top: logged_top,
        } = resolved.body
        else {
            return Ok(());
        };

        if !is_page_aligned(logged_top.wrapping_add(1)) {
            return Err(EngineError::Misaligned {
                field: "client stack top + 1",
                value: logged_top.wrapping_add(1),
            });
        }
        if !is_page_aligned(logged_vstart) {
            return Err(EngineError::Misaligned {
                field: "vstart",
                value: logged_vstart,
            });
        }
        *vstart = logged_vstart;
        *stack_top = logged_top;
        Ok(())
    }

    /// Record the initial client stack, or install the recorded one.
    ///
    /// Replay rewrites `image` from the log and copies the recorded stack
    /// bytes into `memory`.
    ///
    /// # Errors
    ///
    /// Returns error if the stack cannot be described, the stack memory is
    /// not accessible, or on a log failure
    pub fn init_client_stack(
        &mut self,
        stack_top: usize,
        image: &mut StackImage,
        memory: &mut dyn GuestMemory,
    ) -> EngineResult<()> {
        if !self.mode().is_active() {
            return Ok(());
        }
        let invalid = || EngineError::InvalidStack {
            stack_top,
            initial_sp: image.initial_sp,
        };
        if stack_top == 0 {
            return Err(invalid());
        }

        let stack_size = if self.mode().is_record() {
            stack_top
                .checked_sub(image.initial_sp)
                .and_then(|size| u32::try_from(size).ok())
                .ok_or_else(invalid)?
        } else {
            0
        };
        let template = LogEntry::new(
            self.running,
            EntryBody::InitClientStack {
                stack_size,
                auxv: image.auxv,
            },
        );
        let resolved = self.channel.process(template)?;
        let EntryBody::InitClientStack { stack_size, auxv } = resolved.body else {
            return Ok(());
        };

        if self.mode().is_replay() {
            let initial_sp = stack_top.checked_sub(stack_size as usize).ok_or_else(invalid)?;
            image.initial_sp = initial_sp;
            image.auxv = auxv;
            image.stack_end = stack_top;
            image.stack_base = page_round_down(initial_sp);
        }

        let len = stack_size as usize;
        let addr = image.initial_sp;
        let bytes = memory
            .bytes_mut(addr, len)
            .ok_or(EngineError::GuestMemory { addr, len })?;
        self.channel
            .process_data(LogEntry::data(self.running, len, addr), bytes)?;
        Ok(())
    }

    /// Record or check the register state the client starts with.
    ///
    /// # Errors
    ///
    /// Returns error if the state is smaller than the comparison layout, or
    /// on a log failure
    pub fn init_guest_state(&mut self, regs: &[u8]) -> EngineResult<()> {
        if !self.mode().is_active() {
            return Ok(());
        }
        self.snapshot_or_compare(regs)
    }

    /// Log the register state (record) or compare it with the logged one
    /// (replay). Mismatches are counted, not returned.
    ///
    /// # Errors
    ///
    /// Returns error if the state is smaller than the comparison layout, or
    /// on a log failure or length desync
    pub fn snapshot_or_compare(&mut self, live: &[u8]) -> EngineResult<()> {
        let template = LogEntry::snapshot(self.running, live.len());
        match &mut self.channel {
            LogChannel::Inactive => Ok(()),
            LogChannel::Record(writer) => {
                self.verifier.check_len(live)?;
                writer.append(&template, live)?;
                Ok(())
            }
            LogChannel::Replay(reader) => {
                self.verifier.check_len(live)?;
                let mut recorded = self.verifier.take_scratch(live.len());
                reader.resolve_data(template, &mut recorded)?;
                self.verifier.compare(self.running, live, recorded);
                Ok(())
            }
            LogChannel::Closed => Err(EngineError::Closed),
        }
    }

    /// Intercepted timestamp counter read.
    ///
    /// Record reads the live counter and logs it; replay returns the logged
    /// value without reading; inactive passes the live value through.
    ///
    /// # Errors
    ///
    /// Returns error on a log failure or desync
    pub fn timestamp(&mut self, read_tsc: impl FnOnce() -> u64) -> EngineResult<u64> {
        let live = if self.mode().is_replay() { 0 } else { read_tsc() };
        if !self.mode().is_active() {
            return Ok(live);
        }
        let template = LogEntry::new(
            self.running,
            EntryBody::Timestamp {
                low: live as u32,
                high: (live >> 32) as u32,
            },
        );
        let resolved = self.channel.process(template)?;
        match resolved.body {
            EntryBody::Timestamp { low, high } => Ok((u64::from(high) << 32) | u64::from(low)),
            _ => Ok(live),
        }
    }

    /// Kernel id in this run of the thread the log knows as `recorded`
    #[must_use]
    pub fn recorded_to_kernel(&self, recorded: KernelTid) -> Option<KernelTid> {
        self.identities.lookup_by_record_id(recorded)
    }

    /// Recorded id of the thread the kernel now calls `kernel`
    #[must_use]
    pub fn kernel_to_recorded(&self, kernel: KernelTid) -> Option<KernelTid> {
        self.identities.lookup_by_replay_id(kernel)
    }

    /// Register how to tell that the thread in `slot` has left the kernel
    ///
    /// # Errors
    ///
    /// Returns error if the slot is invalid
    pub fn register_exit_probe(&mut self, slot: ThreadId, probe: Arc<dyn ExitProbe>) -> EngineResult<()> {
        self.identities.register_exit_probe(slot, probe)
    }

    /// Decide whether `thread` may take the token now, logging the
    /// acquisition when recording.
    pub(crate) fn admit(&mut self, thread: ThreadId, class: CallerClass) -> EngineResult<Admission> {
        let admission = match (self.mode(), self.schedule.started()) {
            (RrMode::Inactive, _) => Admission::Admitted,
            (_, false) => self.schedule.admit(thread, class)?,
            (RrMode::Record, true) => {
                self.channel.process(LogEntry::acquire(thread, class))?;
                Admission::Admitted
            }
            (RrMode::Replay, true) => self.schedule.admit(thread, class)?,
        };

        match admission {
            Admission::First => self.schedule.start(),
            Admission::Admitted if self.mode().is_record() => self.schedule.schedule(thread, class),
            Admission::Admitted | Admission::NotYet => {}
        }
        if admission != Admission::NotYet {
            self.running = thread;
            tracing::debug!(thread = %thread, ?class, ?admission, "execution token acquired");
        }
        Ok(admission)
    }

    /// Wait for the thread marked as exiting to leave the kernel.
    ///
    /// Polls its exit probe a bounded number of times, then goes on anyway.
    /// The marker is cleared whatever happens.
    pub(crate) fn wait_for_exiting_thread(&mut self) {
        let Some(exiting) = self.schedule.take_exiting() else {
            return;
        };
        if exiting.is_main() {
            return;
        }
        let Some(probe) = self.identities.take_exit_probe(exiting) else {
            return;
        };

        let mut polls = 0;
        while !probe.exit_observed() {
            if polls >= self.config.exit_wait_retries {
                tracing::warn!(
                    thread = %exiting,
                    "thread has been waited on long enough to exit but does not seem done"
                );
                break;
            }
            std::thread::sleep(self.config.exit_wait_interval());
            polls += 1;
        }
    }

    /// Give up the token. Recording makes the log durable; replaying reads
    /// ahead to learn who is admitted next.
    pub(crate) fn release_token(&mut self, thread: ThreadId, tag: ReleaseTag) -> EngineResult<()> {
        self.running = ThreadId::INVALID;
        if !self.mode().is_active() {
            return Ok(());
        }

        self.channel.process(LogEntry::release(thread, tag))?;
        match &mut self.channel {
            LogChannel::Record(writer) => writer.barrier()?,
            LogChannel::Replay(reader) => {
                let template = LogEntry::acquire(ThreadId::INVALID, CallerClass::Unknown);
                match reader.resolve(template) {
                    Ok(LogEntry {
                        body: EntryBody::Acquire { thread: next, class },
                        ..
                    }) => {
                        tracing::debug!(next = %next, ?class, "next token holder");
                        self.schedule.schedule(next, class);
                    }
                    Ok(_) => {}
                    Err(Desync::EndOfLog) => {
                        tracing::debug!("no further acquisitions in the log");
                        self.schedule.exhaust();
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            LogChannel::Inactive | LogChannel::Closed => {}
        }
        tracing::debug!(thread = %thread, tag = %tag, "execution token released");
        Ok(())
    }

    /// Final release of an exiting thread: release, mark the thread as
    /// exiting, then forget its identifiers.
    pub(crate) fn exit_thread(&mut self, thread: ThreadId) -> EngineResult<()> {
        if !thread.is_valid() {
            return Err(EngineError::InvalidSlot { slot: thread });
        }
        self.release_token(thread, ReleaseTag::new(ReleaseTag::EXIT_THREAD))?;
        if !self.mode().is_active() {
            return Ok(());
        }
        self.schedule.mark_exiting(thread);
        self.identities.clear(thread);
        Ok(())
    }

    fn check_running(&self, caller: ThreadId) -> EngineResult<()> {
        if caller != self.running {
            return Err(EngineError::NotRunning {
                caller,
                running: self.running,
            });
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("mode", &self.config.mode)
            .field("running", &self.running)
            .field("schedule", &self.schedule)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(unix)]
fn create_log(config: &RrConfig) -> EngineResult<File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(&config.log_path)
        .map_err(|e| log_open_error(config, &e))
}

#[cfg(not(unix))]
fn create_log(config: &RrConfig) -> EngineResult<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&config.log_path)
        .map_err(|e| log_open_error(config, &e))
}

fn log_open_error(config: &RrConfig, err: &std::io::Error) -> EngineError {
    CoreError::LogOpen {
        path: config.log_path.display().to_string(),
        reason: err.to_string(),
    }
    .into()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::exit::SharedExitFlag;
    use crate::initimg::BufferMemory;
    use crate::verifier::X86Snapshot;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    /// Recording sink whose bytes stay readable after the session is gone
    #[derive(Clone, Default)]
    pub(crate) struct SharedLog(Arc<Mutex<Vec<u8>>>);

    impl SharedLog {
        pub(crate) fn bytes(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Write for SharedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Durable for SharedLog {
        fn sync(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn record(f: impl FnOnce(&mut Session)) -> Vec<u8> {
        let log = SharedLog::default();
        let mut session = Session::recording(log.clone(), RrConfig::default());
        f(&mut session);
        session.close();
        log.bytes()
    }

    fn replay(bytes: Vec<u8>) -> Session {
        Session::replaying(Cursor::new(bytes), RrConfig::default())
    }

    fn regs() -> X86Snapshot {
        X86Snapshot {
            eax: 3,
            ebx: 1,
            esp: 0xBFFF_F000,
            eip: 0x0804_8123,
            cs: 0x73,
            ss: 0x7B,
            ..X86Snapshot::default()
        }
    }

    #[test]
    fn test_inactive_is_passthrough() {
        let mut session = Session::inactive();
        assert_eq!(session.timestamp(|| 0xDEAD_BEEF_0000_0001).unwrap(), 0xDEAD_BEEF_0000_0001);
        let mut ret = 9;
        session.syscall_ret(&mut ret).unwrap();
        assert_eq!(ret, 9);
        let child = session
            .thread_create(ThreadId::MAIN, ThreadId::from_raw(2), KernelTid::from_raw(77))
            .unwrap();
        assert_eq!(child, KernelTid::from_raw(77));
        assert_eq!(session.close().entries, 0);
    }

    #[test]
    fn test_inactive_ignores_register_state() {
        let mut session = Session::inactive();
        session.snapshot_or_compare(&[0u8; 4]).unwrap();
        session.init_guest_state(&[]).unwrap();
        session
            .syscall_args(ThreadId::from_raw(7), 1, &[0u8; 4])
            .unwrap();

        let mut recording = Session::recording(Vec::new(), RrConfig::default());
        assert!(matches!(
            recording.snapshot_or_compare(&[0u8; 4]),
            Err(EngineError::StateTooShort { .. })
        ));
    }

    #[test]
    fn test_inactive_exit_leaves_no_marker() {
        let mut session = Session::inactive();
        let slot = ThreadId::from_raw(2);
        session
            .register_exit_probe(slot, Arc::new(SharedExitFlag::new(1)))
            .unwrap();
        session.exit_thread(slot).unwrap();
        assert_eq!(session.schedule().exiting(), None);
        assert!(session.identities().get(slot).unwrap().has_exit_probe());
    }

    #[test]
    fn test_syscall_roundtrip() {
        let bytes = record(|s| {
            s.running = ThreadId::MAIN;
            s.syscall_args(ThreadId::MAIN, 3, &regs().to_bytes()).unwrap();
            let mut buf = *b"recorded";
            s.syscall_mem(&mut [&mut buf[..]]).unwrap();
            let mut ret = 8;
            s.syscall_ret(&mut ret).unwrap();
        });

        let mut session = replay(bytes);
        session.running = ThreadId::MAIN;
        session
            .syscall_args(ThreadId::MAIN, 3, &regs().to_bytes())
            .unwrap();
        let mut buf = [0u8; 8];
        session.syscall_mem(&mut [&mut buf[..]]).unwrap();
        assert_eq!(&buf, b"recorded");
        let mut ret = 0;
        session.syscall_ret(&mut ret).unwrap();
        assert_eq!(ret, 8);
        assert_eq!(session.divergence(), DivergenceStats::default());
    }

    #[test]
    fn test_syscall_number_desync() {
        let bytes = record(|s| {
            s.running = ThreadId::MAIN;
            s.syscall_args(ThreadId::MAIN, 3, &regs().to_bytes()).unwrap();
        });
        let mut session = replay(bytes);
        session.running = ThreadId::MAIN;
        let err = session
            .syscall_args(ThreadId::MAIN, 4, &regs().to_bytes())
            .unwrap_err();
        assert!(matches!(err, EngineError::Desync(Desync::SyscallMismatch { .. })));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_syscall_args_requires_running_thread() {
        let mut session = Session::recording(Vec::new(), RrConfig::default());
        let err = session
            .syscall_args(ThreadId::from_raw(2), 1, &regs().to_bytes())
            .unwrap_err();
        assert!(matches!(err, EngineError::NotRunning { .. }));
    }

    #[test]
    fn test_register_divergence_counted_per_call() {
        let bytes = record(|s| {
            s.running = ThreadId::MAIN;
            s.syscall_args(ThreadId::MAIN, 4, &regs().to_bytes()).unwrap();
            s.syscall_args(ThreadId::MAIN, 4, &regs().to_bytes()).unwrap();
            s.syscall_args(ThreadId::MAIN, 4, &regs().to_bytes()).unwrap();
        });

        let mut session = replay(bytes);
        session.running = ThreadId::MAIN;
        let mut one_off = regs();
        one_off.ecx = 0x55;
        let mut many_off = regs();
        many_off.eax = 0;
        many_off.edi = 1;
        many_off.gs = 0x33;

        session
            .syscall_args(ThreadId::MAIN, 4, &one_off.to_bytes())
            .unwrap();
        assert_eq!(session.divergence().guest_state, 1);
        session
            .syscall_args(ThreadId::MAIN, 4, &many_off.to_bytes())
            .unwrap();
        assert_eq!(session.divergence().guest_state, 2);
        session
            .syscall_args(ThreadId::MAIN, 4, &regs().to_bytes())
            .unwrap();
        assert_eq!(session.close().divergence.guest_state, 2);
    }

    #[test]
    fn test_dispatch_counter_soft_and_phase_fatal() {
        let bytes = record(|s| {
            s.dispatch_counter(100, true).unwrap();
            s.dispatch_counter(101, false).unwrap();
            s.dispatch_counter(102, true).unwrap();
        });
        let mut session = replay(bytes);
        session.dispatch_counter(100, true).unwrap();
        session.dispatch_counter(999, false).unwrap();
        assert_eq!(session.divergence().dispatch_counter, 1);
        let err = session.dispatch_counter(102, false).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Desync(Desync::DispatchPhaseMismatch { .. })
        ));
    }

    #[test]
    fn test_timestamp_replayed_without_reading() {
        let bytes = record(|s| {
            assert_eq!(s.timestamp(|| 0x0000_0001_8000_0002).unwrap(), 0x0000_0001_8000_0002);
        });
        let mut session = replay(bytes);
        let value = session
            .timestamp(|| panic!("counter must not be read in replay"))
            .unwrap();
        assert_eq!(value, 0x0000_0001_8000_0002);
    }

    #[test]
    fn test_cmdline_restored() {
        let args = vec!["-l".to_string(), "/tmp".to_string()];
        let bytes = record(|s| {
            let cmdline = s.client_cmdline("/bin/ls", &args).unwrap();
            assert_eq!(cmdline.exe, "/bin/ls");
        });

        let mut session = replay(bytes);
        let cmdline = session.client_cmdline("/bin/other", &[]).unwrap();
        assert_eq!(cmdline, ClientCommandLine::new("/bin/ls", ["-l", "/tmp"]));
    }

    #[test]
    fn test_cmdline_too_long() {
        let mut session = Session::recording(Vec::new(), RrConfig::default());
        let args = vec!["x".repeat(MAX_CMDLINE_LENGTH)];
        let err = session.client_cmdline("prog", &args).unwrap_err();
        assert!(matches!(err, EngineError::CmdlineTooLong { .. }));
    }

    #[test]
    fn test_thread_create_maps_ids() {
        let child = ThreadId::from_raw(2);
        let bytes = record(|s| {
            s.running = ThreadId::MAIN;
            let shown = s
                .thread_create(ThreadId::MAIN, child, KernelTid::from_raw(4001))
                .unwrap();
            assert_eq!(shown, KernelTid::from_raw(4001));
        });

        let mut session = replay(bytes);
        session.running = ThreadId::MAIN;
        let shown = session
            .thread_create(ThreadId::MAIN, child, KernelTid::from_raw(5123))
            .unwrap();
        assert_eq!(shown, KernelTid::from_raw(4001));
        assert_eq!(
            session.recorded_to_kernel(KernelTid::from_raw(4001)),
            Some(KernelTid::from_raw(5123))
        );
        assert_eq!(
            session.kernel_to_recorded(KernelTid::from_raw(5123)),
            Some(KernelTid::from_raw(4001))
        );
    }

    #[test]
    fn test_initial_state_restored() {
        const TOP: usize = 0xBFFF_FFFF;
        let bytes = record(|s| {
            let mut vstart = 0x3800_0000;
            let mut stack_top = TOP;
            s.init_mem_layout(&mut vstart, &mut stack_top).unwrap();

            let mut image = StackImage::new(TOP - 0x1F, 0xBFFF_FFE8);
            let mut memory = BufferMemory::new(TOP - 0x1F, (0u8..0x1F).collect());
            s.init_client_stack(TOP, &mut image, &mut memory).unwrap();
            s.init_guest_state(&regs().to_bytes()).unwrap();
        });

        let mut session = replay(bytes);
        let mut vstart = 0x4000_0000;
        let mut stack_top = 0xBFFF_0FFF;
        session
            .init_mem_layout(&mut vstart, &mut stack_top)
            .unwrap();
        assert_eq!((vstart, stack_top), (0x3800_0000, TOP));

        let mut image = StackImage::new(TOP - 0x100, 0);
        let mut memory = BufferMemory::zeroed(TOP - 0x100, 0x100);
        session
            .init_client_stack(stack_top, &mut image, &mut memory)
            .unwrap();
        assert_eq!(image.initial_sp, TOP - 0x1F);
        assert_eq!(image.auxv, 0xBFFF_FFE8);
        assert_eq!(image.stack_end, TOP);
        assert_eq!(image.stack_base, 0xBFFF_F000);
        assert_eq!(&memory.as_bytes()[0x100 - 0x1F..], &(0u8..0x1F).collect::<Vec<_>>()[..]);

        session.init_guest_state(&regs().to_bytes()).unwrap();
        assert_eq!(session.divergence().guest_state, 0);
    }

    #[test]
    fn test_misaligned_layout() {
        let mut session = Session::recording(Vec::new(), RrConfig::default());
        let mut vstart = 0x3800_0010;
        let mut stack_top = 0xBFFF_FFFF;
        let err = session
            .init_mem_layout(&mut vstart, &mut stack_top)
            .unwrap_err();
        assert!(matches!(err, EngineError::Misaligned { field: "vstart", .. }));
    }

    #[test]
    fn test_close_idempotent() {
        let mut session = Session::recording(Vec::new(), RrConfig::default());
        session.timestamp(|| 1).unwrap();
        let first = session.close();
        let second = session.close();
        assert_eq!(first, second);
        assert_eq!(first.entries, 1);
        assert!(matches!(session.timestamp(|| 1), Err(EngineError::Closed)));
    }

    #[test]
    fn test_open_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");

        let mut session = Session::open(RrConfig::record(&path)).unwrap();
        session.timestamp(|| 42).unwrap();
        session.close();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        let mut session = Session::open(RrConfig::replay(&path)).unwrap();
        assert_eq!(session.timestamp(|| 0).unwrap(), 42);
        let summary = session.close();
        assert_eq!(summary.mode, RrMode::Replay);
        let json: serde_json::Value = serde_json::from_str(&summary.to_json()).unwrap();
        assert_eq!(json["mode"], "replay");
        assert_eq!(json["entries"], 1);
        assert_eq!(json["divergence"]["guest_state"], 0);
    }

    #[test]
    fn test_open_missing_log() {
        let dir = tempfile::tempdir().unwrap();
        let err = Session::open(RrConfig::replay(dir.path().join("absent.log"))).unwrap_err();
        assert!(matches!(err, EngineError::Core(CoreError::LogOpen { .. })));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_exit_probe_slot_checked() {
        let mut session = Session::inactive();
        let probe = Arc::new(SharedExitFlag::new(1));
        assert!(session
            .register_exit_probe(ThreadId::INVALID, probe.clone())
            .is_err());
        session
            .register_exit_probe(ThreadId::from_raw(3), probe)
            .unwrap();
        assert!(session
            .identities()
            .get(ThreadId::from_raw(3))
            .unwrap()
            .has_exit_probe());
    }
}
