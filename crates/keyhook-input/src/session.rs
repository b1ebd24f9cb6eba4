//! Capture sessions and their termination transitions.
//!
//! A [`Session`] is owned by the runtime arena and only touched by the owning
//! thread. Everything the hook thread may touch for one run lives in a
//! [`RunState`] shared through an `Arc`: the status byte, the ending detail
//! and the relay sender. A fresh `RunState` is created for every Start, so a
//! hook still holding the previous run's state can never disturb the new one.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Instant;

use keyhook_core::error::{KeyhookError, Result};
use keyhook_core::types::{Modifiers, Sc, SessionId, Vk};

use crate::hook::LogicalModifiers;
use crate::keyclass::{KeyClassTables, KeyFlags};
use crate::keys::KeyResolver;
use crate::matchlist::{EndChars, MatchList};
use crate::options::InputOptions;
use crate::relay::{RelayEvent, RelaySender};

// =============================================================================
// Status
// =============================================================================

/// Where a session stands. Every value other than `InProgress` is terminal
/// for the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InputStatus {
    /// Never started, or stopped by cancellation.
    Off = 0,
    InProgress = 1,
    TimedOut = 2,
    /// A match phrase completed; the index is in the ending detail.
    Matched = 3,
    /// An end key or end char was pressed.
    EndedByKey = 4,
    LimitReached = 5,
}

impl InputStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => InputStatus::InProgress,
            2 => InputStatus::TimedOut,
            3 => InputStatus::Matched,
            4 => InputStatus::EndedByKey,
            5 => InputStatus::LimitReached,
            _ => InputStatus::Off,
        }
    }

    /// End-reason label reported to callers.
    pub fn label(&self) -> &'static str {
        match self {
            InputStatus::Off => "Stopped",
            InputStatus::InProgress => "",
            InputStatus::TimedOut => "Timeout",
            InputStatus::Matched => "Match",
            InputStatus::EndedByKey => "EndKey",
            InputStatus::LimitReached => "Max",
        }
    }
}

impl fmt::Display for InputStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputStatus::Off => write!(f, "Off"),
            InputStatus::InProgress => write!(f, "InProgress"),
            InputStatus::TimedOut => write!(f, "TimedOut"),
            InputStatus::Matched => write!(f, "Matched"),
            InputStatus::EndedByKey => write!(f, "EndedByKey"),
            InputStatus::LimitReached => write!(f, "LimitReached"),
        }
    }
}

/// What ended a run. Only the fields relevant to the final status are set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EndingDetail {
    pub vk: Vk,
    pub sc: Sc,
    pub by_sc: bool,
    pub required_shift: bool,
    /// Set when the run ended by character identity.
    pub ch: Option<char>,
    pub match_index: usize,
    /// Logical modifier state when the run ended.
    pub modifiers: Modifiers,
}

// =============================================================================
// Buffer
// =============================================================================

/// Captured text, preallocated so appending never allocates.
#[derive(Debug)]
pub struct CaptureBuffer {
    text: String,
    len: usize,
    limit: usize,
}

impl CaptureBuffer {
    /// Allocate room for `limit` characters.
    pub fn with_limit(limit: usize) -> Result<Self> {
        let mut text = String::new();
        let bytes = limit
            .checked_mul(4)
            .ok_or(KeyhookError::OutOfMemory("capture buffer"))?;
        text.try_reserve_exact(bytes)
            .map_err(|_| KeyhookError::OutOfMemory("capture buffer"))?;
        Ok(Self {
            text,
            len: 0,
            limit,
        })
    }

    /// Append unless the buffer is full. Returns whether `ch` was kept.
    pub fn push(&mut self, ch: char) -> bool {
        if self.len >= self.limit {
            return false;
        }
        self.text.push(ch);
        self.len += 1;
        true
    }

    pub fn pop(&mut self) -> Option<char> {
        let ch = self.text.pop()?;
        self.len -= 1;
        Some(ch)
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.len = 0;
    }

    pub fn is_full(&self) -> bool {
        self.len >= self.limit
    }

    /// Number of characters held.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Most bytes the buffer can hold.
    pub fn byte_capacity(&self) -> usize {
        self.limit.saturating_mul(4)
    }

    /// Replace `out` with the captured text. Does not allocate when `out`
    /// already has [`byte_capacity`](Self::byte_capacity) bytes reserved.
    pub fn copy_into(&self, out: &mut String) {
        out.clear();
        out.push_str(&self.text);
    }
}

/// Buffer shared between a session and the hook.
pub type SharedBuffer = Arc<Mutex<CaptureBuffer>>;

/// Owner-side lock. Critical sections taken through it must not allocate.
pub(crate) fn lock_buffer(buffer: &SharedBuffer) -> MutexGuard<'_, CaptureBuffer> {
    buffer.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Hook-side lock: spins instead of parking the thread.
pub(crate) fn spin_lock_buffer(buffer: &SharedBuffer) -> MutexGuard<'_, CaptureBuffer> {
    loop {
        match buffer.try_lock() {
            Ok(guard) => return guard,
            Err(TryLockError::Poisoned(poisoned)) => return poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => std::hint::spin_loop(),
        }
    }
}

// =============================================================================
// Compiled configuration
// =============================================================================

/// Everything Setup compiles: options, key tables, end chars and phrases.
#[derive(Debug, Clone, Default)]
pub struct CompiledInput {
    pub options: InputOptions,
    pub keys: KeyClassTables,
    pub end_chars: EndChars,
    pub matches: MatchList,
}

impl CompiledInput {
    /// Compile the three Setup strings. Nothing is kept on failure.
    pub fn compile(
        options: &str,
        end_keys: &str,
        match_list: &str,
        resolver: &dyn KeyResolver,
    ) -> Result<Self> {
        let mut compiled = CompiledInput {
            options: InputOptions::parse(options),
            ..Default::default()
        };
        let single_chars = compiled.keys.apply_keys(
            end_keys,
            KeyFlags::end_keys(),
            compiled.options.end_char_mode,
            resolver,
        );
        compiled.end_chars.compile(end_keys, single_chars)?;
        compiled.matches.compile(match_list)?;
        Ok(compiled)
    }
}

// =============================================================================
// Hook-shared run state
// =============================================================================

/// State of one run, shared with the hook thread.
///
/// The End* transitions are the only writers. The first transition of a run
/// claims it; later ones return `false` and change nothing. The claimant
/// writes the detail, publishes the status with release ordering and then
/// posts the relay event.
pub struct RunState {
    session: SessionId,
    run: u32,
    status: AtomicU8,
    claimed: AtomicBool,
    vk: AtomicU8,
    sc: AtomicU16,
    by_sc: AtomicBool,
    required_shift: AtomicBool,
    ch: AtomicU32,
    match_index: AtomicUsize,
    modifiers: AtomicU8,
    logical: LogicalModifiers,
    relay: RelaySender,
}

impl fmt::Debug for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunState")
            .field("session", &self.session)
            .field("run", &self.run)
            .field("status", &self.status())
            .finish()
    }
}

impl RunState {
    /// A run that is already in progress.
    pub fn begin(
        session: SessionId,
        run: u32,
        logical: LogicalModifiers,
        relay: RelaySender,
    ) -> Self {
        Self {
            session,
            run,
            status: AtomicU8::new(InputStatus::InProgress as u8),
            claimed: AtomicBool::new(false),
            vk: AtomicU8::new(0),
            sc: AtomicU16::new(0),
            by_sc: AtomicBool::new(false),
            required_shift: AtomicBool::new(false),
            ch: AtomicU32::new(0),
            match_index: AtomicUsize::new(0),
            modifiers: AtomicU8::new(0),
            logical,
            relay,
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn run(&self) -> u32 {
        self.run
    }

    pub fn status(&self) -> InputStatus {
        InputStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn in_progress(&self) -> bool {
        self.status() == InputStatus::InProgress
    }

    /// Snapshot of the ending detail. Meaningful once the run has ended.
    pub fn ending(&self) -> EndingDetail {
        let ch = self.ch.load(Ordering::Acquire);
        EndingDetail {
            vk: self.vk.load(Ordering::Acquire),
            sc: self.sc.load(Ordering::Acquire),
            by_sc: self.by_sc.load(Ordering::Acquire),
            required_shift: self.required_shift.load(Ordering::Acquire),
            ch: if ch == 0 { None } else { char::from_u32(ch) },
            match_index: self.match_index.load(Ordering::Acquire),
            modifiers: Modifiers(self.modifiers.load(Ordering::Acquire)),
        }
    }

    fn claim(&self) -> bool {
        self.in_progress()
            && self
                .claimed
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    pub fn end_by_match(&self, index: usize) -> bool {
        if !self.claim() {
            return false;
        }
        self.match_index.store(index, Ordering::Relaxed);
        self.finish(InputStatus::Matched);
        true
    }

    pub fn end_by_key(&self, vk: Vk, sc: Sc, by_sc: bool, required_shift: bool) -> bool {
        if !self.claim() {
            return false;
        }
        self.vk.store(vk, Ordering::Relaxed);
        self.sc.store(sc, Ordering::Relaxed);
        self.by_sc.store(by_sc, Ordering::Relaxed);
        self.required_shift.store(required_shift, Ordering::Relaxed);
        self.ch.store(0, Ordering::Relaxed);
        self.finish(InputStatus::EndedByKey);
        true
    }

    pub fn end_by_char(&self, ch: char) -> bool {
        debug_assert!(ch != '\0');
        if !self.claim() {
            return false;
        }
        self.ch.store(u32::from(ch), Ordering::Relaxed);
        self.finish(InputStatus::EndedByKey);
        true
    }

    /// End with a reason that carries no detail of its own: `TimedOut`,
    /// `LimitReached` or `Off` for cancellation.
    pub fn end_by_reason(&self, reason: InputStatus) -> bool {
        debug_assert!(reason != InputStatus::InProgress);
        if reason == InputStatus::InProgress || !self.claim() {
            return false;
        }
        self.finish(reason);
        true
    }

    fn finish(&self, reason: InputStatus) {
        self.modifiers
            .store(self.logical.get().bits(), Ordering::Relaxed);
        self.status.store(reason as u8, Ordering::Release);
        self.relay.post(RelayEvent {
            session: self.session,
            run: self.run,
        });
    }
}

// =============================================================================
// Owner handle
// =============================================================================

/// The external object wrapping a session.
pub trait InputOwner: Send + Sync {
    /// Whether the owner wants an end-of-capture callback.
    fn has_on_end(&self) -> bool {
        false
    }
}

/// Counted reference to a session's owner. Cloning acquires a reference,
/// dropping releases it; only the owning thread does either.
#[derive(Clone)]
pub struct OwnerHandle(Arc<dyn InputOwner>);

impl OwnerHandle {
    pub fn new(owner: Arc<dyn InputOwner>) -> Self {
        Self(owner)
    }

    pub fn has_on_end(&self) -> bool {
        self.0.has_on_end()
    }

    /// Identity comparison.
    pub fn same_owner(&self, other: &OwnerHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Number of live references to the owner.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub fn owner(&self) -> &Arc<dyn InputOwner> {
        &self.0
    }
}

impl fmt::Debug for OwnerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OwnerHandle")
            .field(&Arc::as_ptr(&self.0).cast::<()>())
            .finish()
    }
}

// =============================================================================
// Session
// =============================================================================

/// One capture request and its state across runs.
#[derive(Debug)]
pub struct Session {
    pub(crate) id: SessionId,
    pub(crate) compiled: Arc<CompiledInput>,
    pub(crate) buffer: SharedBuffer,
    buffer_capacity: usize,
    pub(crate) state: Option<Arc<RunState>>,
    pub(crate) run: u32,
    pub(crate) timeout_at: Option<Instant>,
    pub(crate) prev: Option<SessionId>,
    pub(crate) owner: Option<OwnerHandle>,
    /// Reference held while the session is on the stack.
    pub(crate) keepalive: Option<OwnerHandle>,
}

impl Session {
    /// Compile and allocate a session. Fails before anything is linked.
    pub fn setup(
        id: SessionId,
        options: &str,
        end_keys: &str,
        match_list: &str,
        owner: Option<OwnerHandle>,
        resolver: &dyn KeyResolver,
    ) -> Result<Self> {
        let compiled = CompiledInput::compile(options, end_keys, match_list, resolver)?;
        let buffer = CaptureBuffer::with_limit(compiled.options.buffer_limit)?;
        let buffer_capacity = buffer.byte_capacity();
        Ok(Self {
            id,
            compiled: Arc::new(compiled),
            buffer: Arc::new(Mutex::new(buffer)),
            buffer_capacity,
            state: None,
            run: 0,
            timeout_at: None,
            prev: None,
            owner,
            keepalive: None,
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn status(&self) -> InputStatus {
        self.state
            .as_ref()
            .map_or(InputStatus::Off, |state| state.status())
    }

    pub fn in_progress(&self) -> bool {
        self.status() == InputStatus::InProgress
    }

    pub fn ending(&self) -> EndingDetail {
        self.state
            .as_ref()
            .map(|state| state.ending())
            .unwrap_or_default()
    }

    /// Captured text so far.
    pub fn input(&self) -> String {
        let mut out = String::with_capacity(self.buffer_capacity);
        lock_buffer(&self.buffer).copy_into(&mut out);
        out
    }

    pub fn options(&self) -> &InputOptions {
        &self.compiled.options
    }

    pub fn compiled(&self) -> &CompiledInput {
        &self.compiled
    }

    pub fn run(&self) -> u32 {
        self.run
    }

    pub fn timeout_at(&self) -> Option<Instant> {
        self.timeout_at
    }

    pub fn prev(&self) -> Option<SessionId> {
        self.prev
    }

    pub fn owner(&self) -> Option<&OwnerHandle> {
        self.owner.as_ref()
    }

    /// Open a new run: fresh shared state, empty buffer.
    pub(crate) fn begin_run(&mut self, logical: LogicalModifiers, relay: RelaySender) {
        debug_assert!(!self.in_progress());
        self.run = self.run.wrapping_add(1);
        lock_buffer(&self.buffer).clear();
        self.state = Some(Arc::new(RunState::begin(self.id, self.run, logical, relay)));
    }

    /// Mutable access to the compiled configuration. A hook snapshot taken
    /// earlier keeps the previous copy.
    pub(crate) fn compiled_mut(&mut self) -> &mut CompiledInput {
        Arc::make_mut(&mut self.compiled)
    }

    pub(crate) fn run_state(&self) -> Option<&Arc<RunState>> {
        self.state.as_ref()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::UsKeyboard;
    use crate::relay;

    fn running_state() -> (RunState, relay::RelayReceiver, LogicalModifiers) {
        let (tx, rx) = relay::channel();
        let logical = LogicalModifiers::new();
        (RunState::begin(SessionId(1), 1, logical.clone(), tx), rx, logical)
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(InputStatus::Off.label(), "Stopped");
        assert_eq!(InputStatus::InProgress.label(), "");
        assert_eq!(InputStatus::TimedOut.label(), "Timeout");
        assert_eq!(InputStatus::Matched.label(), "Match");
        assert_eq!(InputStatus::EndedByKey.label(), "EndKey");
        assert_eq!(InputStatus::LimitReached.label(), "Max");
        assert_eq!(InputStatus::EndedByKey.to_string(), "EndedByKey");
    }

    #[test]
    fn test_status_byte_round_trip() {
        for status in [
            InputStatus::Off,
            InputStatus::InProgress,
            InputStatus::TimedOut,
            InputStatus::Matched,
            InputStatus::EndedByKey,
            InputStatus::LimitReached,
        ] {
            assert_eq!(InputStatus::from_u8(status as u8), status);
        }
        assert_eq!(InputStatus::from_u8(200), InputStatus::Off);
    }

    #[test]
    fn test_capture_buffer_limit() {
        let mut buffer = CaptureBuffer::with_limit(2).unwrap();
        assert!(buffer.push('h'));
        assert!(buffer.push('é'));
        assert!(buffer.is_full());
        assert!(!buffer.push('x'));
        assert_eq!(buffer.as_str(), "hé");
        assert_eq!(buffer.pop(), Some('é'));
        assert_eq!(buffer.len(), 1);
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.pop(), None);
    }

    #[test]
    fn test_copy_into_reuses_reserved_string() {
        let mut buffer = CaptureBuffer::with_limit(3).unwrap();
        for ch in ['é', '€', '𝄞'] {
            buffer.push(ch);
        }
        let mut out = String::with_capacity(buffer.byte_capacity());
        out.push_str("stale");
        let before = out.as_ptr();
        buffer.copy_into(&mut out);
        assert_eq!(out, "é€𝄞");
        assert_eq!(out.as_ptr(), before);
    }

    #[test]
    fn test_spin_lock_waits_for_owner_section() {
        let buffer: SharedBuffer = Arc::new(Mutex::new(CaptureBuffer::with_limit(4).unwrap()));
        let guard = lock_buffer(&buffer);
        let hook_buffer = Arc::clone(&buffer);
        let hook = std::thread::spawn(move || {
            spin_lock_buffer(&hook_buffer).push('k');
        });
        std::thread::sleep(std::time::Duration::from_millis(10));
        drop(guard);
        hook.join().unwrap();
        assert_eq!(lock_buffer(&buffer).as_str(), "k");
    }

    #[test]
    fn test_capture_buffer_zero_limit() {
        let mut buffer = CaptureBuffer::with_limit(0).unwrap();
        assert!(buffer.is_full());
        assert!(!buffer.push('a'));
    }

    #[test]
    fn test_capture_buffer_oom() {
        let result = CaptureBuffer::with_limit(usize::MAX / 2);
        assert!(matches!(result, Err(KeyhookError::OutOfMemory(_))));
    }

    #[test]
    fn test_end_by_key_records_detail_and_posts() {
        let (state, mut rx, logical) = running_state();
        logical.set(Modifiers::LSHIFT);
        assert!(state.end_by_key(0x31, 0x002, false, true));
        assert_eq!(state.status(), InputStatus::EndedByKey);
        let detail = state.ending();
        assert_eq!(detail.vk, 0x31);
        assert!(detail.required_shift);
        assert_eq!(detail.ch, None);
        assert_eq!(detail.modifiers, Modifiers::LSHIFT);
        assert_eq!(
            rx.try_recv(),
            Some(RelayEvent {
                session: SessionId(1),
                run: 1
            })
        );
    }

    #[test]
    fn test_second_transition_ignored() {
        let (state, mut rx, _logical) = running_state();
        assert!(state.end_by_char('.'));
        assert!(!state.end_by_match(3));
        assert!(!state.end_by_reason(InputStatus::TimedOut));
        assert!(!state.end_by_key(0x41, 0x1E, false, false));
        assert_eq!(state.status(), InputStatus::EndedByKey);
        assert_eq!(state.ending().ch, Some('.'));
        assert_eq!(state.ending().match_index, 0);
        assert!(rx.try_recv().is_some());
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn test_end_by_reason_variants() {
        let (state, _rx, _logical) = running_state();
        assert!(state.end_by_reason(InputStatus::Off));
        assert_eq!(state.status(), InputStatus::Off);

        let (state, _rx, _logical) = running_state();
        assert!(state.end_by_match(2));
        assert_eq!(state.status(), InputStatus::Matched);
        assert_eq!(state.ending().match_index, 2);
    }

    #[test]
    fn test_compile_all_three_strings() {
        let kb = UsKeyboard::new();
        let compiled = CompiledInput::compile("E C", "ab{Enter}", "x,y", &kb).unwrap();
        assert!(compiled.options.end_char_mode);
        assert_eq!(compiled.end_chars.as_str(), "ab");
        assert_eq!(compiled.matches.len(), 2);
    }

    #[test]
    fn test_session_setup_and_run() {
        let kb = UsKeyboard::new();
        let mut session = Session::setup(SessionId(5), "L3", "{Enter}", "", None, &kb).unwrap();
        assert_eq!(session.status(), InputStatus::Off);
        assert_eq!(session.input(), "");
        assert_eq!(session.options().buffer_limit, 3);

        let (tx, _rx) = relay::channel();
        session.begin_run(LogicalModifiers::new(), tx.clone());
        assert!(session.in_progress());
        assert_eq!(session.run(), 1);
        lock_buffer(&session.buffer).push('a');
        assert_eq!(session.input(), "a");

        session.run_state().unwrap().end_by_reason(InputStatus::Off);
        session.begin_run(LogicalModifiers::new(), tx);
        assert_eq!(session.run(), 2);
        assert_eq!(session.input(), "");
    }

    #[test]
    fn test_owner_handle_counting() {
        struct Owner;
        impl InputOwner for Owner {}

        let handle = OwnerHandle::new(Arc::new(Owner));
        assert_eq!(handle.ref_count(), 1);
        let keep = handle.clone();
        assert_eq!(handle.ref_count(), 2);
        assert!(handle.same_owner(&keep));
        assert!(!handle.has_on_end());
        drop(keep);
        assert_eq!(handle.ref_count(), 1);

        let other = OwnerHandle::new(Arc::new(Owner));
        assert!(!handle.same_owner(&other));
    }
}
