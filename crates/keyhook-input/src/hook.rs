//! Hook-thread side of the engine.
//!
//! The runtime publishes an immutable [`HookView`] of the top session into a
//! [`HookSlot`]. The hook thread holds a [`HookFeed`], loads the slot
//! without locking on every keystroke and tests the keystroke against it. A view can read
//! the compiled tables, append to the capture buffer and fire the End*
//! transitions. It has no access to owners or to the stack.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;

use keyhook_core::types::{is_modifier_vk, KeyEvent, Modifiers, Sc, SessionId, Vk, VK_BACK};

use crate::keyclass::{KEY_IGNORE_TEXT, KEY_NOTIFY, KEY_VISIBILITY_OVERRIDE, KEY_VISIBLE};
use crate::session::{spin_lock_buffer, CompiledInput, InputStatus, RunState, SharedBuffer};

// =============================================================================
// Logical modifier state
// =============================================================================

/// Modifier state as last seen by the hook. Read when a run ends.
#[derive(Debug, Clone, Default)]
pub struct LogicalModifiers(Arc<AtomicU8>);

impl LogicalModifiers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Modifiers {
        Modifiers(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, modifiers: Modifiers) {
        self.0.store(modifiers.bits(), Ordering::Release);
    }
}

// =============================================================================
// View
// =============================================================================

/// What the hook should do with a keystroke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyDisposition {
    /// Let the keystroke through to the active window.
    pub visible: bool,
    /// Report the keystroke to the notify callback.
    pub notify: bool,
    /// This keystroke ended the session.
    pub ended: bool,
}

impl KeyDisposition {
    /// Not captured at all.
    pub const PASS: KeyDisposition = KeyDisposition {
        visible: true,
        notify: false,
        ended: false,
    };
}

/// Read-only snapshot of one session run, as seen from the hook thread.
#[derive(Debug, Clone)]
pub struct HookView {
    session: SessionId,
    compiled: Arc<CompiledInput>,
    state: Arc<RunState>,
    buffer: SharedBuffer,
}

impl HookView {
    pub(crate) fn new(
        session: SessionId,
        compiled: Arc<CompiledInput>,
        state: Arc<RunState>,
        buffer: SharedBuffer,
    ) -> Self {
        Self {
            session,
            compiled,
            state,
            buffer,
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn run(&self) -> u32 {
        self.state.run()
    }

    pub fn status(&self) -> InputStatus {
        self.state.status()
    }

    /// Combined key-class flags for a keystroke.
    pub fn key_class(&self, vk: Vk, sc: Sc) -> u8 {
        self.compiled.keys.flags(vk, sc)
    }

    pub fn end_by_match(&self, index: usize) -> bool {
        self.state.end_by_match(index)
    }

    pub fn end_by_key(&self, vk: Vk, sc: Sc, by_sc: bool, required_shift: bool) -> bool {
        self.state.end_by_key(vk, sc, by_sc, required_shift)
    }

    pub fn end_by_char(&self, ch: char) -> bool {
        self.state.end_by_char(ch)
    }

    pub fn end_by_reason(&self, reason: InputStatus) -> bool {
        self.state.end_by_reason(reason)
    }

    fn disposition(&self, flags: u8, is_text: bool, ended: bool) -> KeyDisposition {
        let options = &self.compiled.options;
        let visible = if flags & KEY_VISIBILITY_OVERRIDE != 0 {
            flags & KEY_VISIBLE != 0
        } else if is_text {
            options.visible_text
        } else {
            options.visible_non_text
        };
        KeyDisposition {
            visible,
            notify: flags & KEY_NOTIFY != 0 || (!is_text && options.notify_non_text),
            ended,
        }
    }

    /// Test one key-down against this run.
    pub fn collect(&self, event: &KeyEvent) -> KeyDisposition {
        let options = &self.compiled.options;
        if !self.state.in_progress() || event.send_level < options.min_send_level {
            return KeyDisposition::PASS;
        }

        let flags = self.compiled.keys.flags(event.vk, event.sc);
        if let Some(hit) = self.compiled.keys.end_key(event.vk, event.sc, event.modifiers) {
            let ended = self.end_by_key(event.vk, event.sc, hit.by_sc, hit.required_shift);
            tracing::trace!(session = %self.session, vk = event.vk, "end key");
            return self.disposition(flags, event.text.is_some(), ended);
        }

        if is_modifier_vk(event.vk) {
            return KeyDisposition::PASS;
        }

        let modifiers = event.modifiers;
        let transcribe = modifiers.is_empty()
            || modifiers.shift_only()
            || modifiers.ctrl_alt()
            || options.transcribe_modified_keys;
        if !transcribe {
            return self.disposition(flags, false, false);
        }

        if event.vk == VK_BACK && modifiers.is_empty() {
            if options.backspace_is_undo {
                spin_lock_buffer(&self.buffer).pop();
            }
            return self.disposition(flags, false, false);
        }

        let Some(mut ch) = event.text else {
            return self.disposition(flags, false, false);
        };

        if options.end_char_mode && self.compiled.end_chars.contains(ch, options.case_sensitive) {
            let ended = self.end_by_char(ch);
            return self.disposition(flags, true, ended);
        }

        if flags & KEY_IGNORE_TEXT != 0 {
            return self.disposition(flags, true, false);
        }

        if ch == '\r' {
            ch = '\n';
        }

        let ended = {
            let mut buffer = spin_lock_buffer(&self.buffer);
            buffer.push(ch);
            let matched = if self.compiled.matches.is_empty() {
                None
            } else {
                self.compiled.matches.find_match(
                    buffer.as_str(),
                    options.case_sensitive,
                    options.find_anywhere,
                )
            };
            let full = buffer.is_full();
            drop(buffer);
            match matched {
                Some(index) => self.end_by_match(index),
                None if full => self.end_by_reason(InputStatus::LimitReached),
                None => false,
            }
        };
        self.disposition(flags, true, ended)
    }
}

// =============================================================================
// Slot and feed
// =============================================================================

/// Where the runtime publishes the current top view. Loads and stores are
/// atomic pointer swaps; neither side ever waits on the other.
#[derive(Debug, Clone, Default)]
pub struct HookSlot(Arc<ArcSwapOption<HookView>>);

impl HookSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn publish(&self, view: Option<Arc<HookView>>) {
        self.0.store(view);
    }

    /// The view the hook would test against right now.
    pub fn snapshot(&self) -> Option<Arc<HookView>> {
        self.0.load_full()
    }
}

/// Handle given to the hook thread.
#[derive(Debug, Clone)]
pub struct HookFeed {
    slot: HookSlot,
    modifiers: LogicalModifiers,
}

impl HookFeed {
    pub(crate) fn new(slot: HookSlot, modifiers: LogicalModifiers) -> Self {
        Self { slot, modifiers }
    }

    /// Deliver a key-down. Without an active session the key passes through.
    pub fn key_down(&self, event: &KeyEvent) -> KeyDisposition {
        self.modifiers.set(event.modifiers);
        match &*self.slot.0.load() {
            Some(view) => view.collect(event),
            None => KeyDisposition::PASS,
        }
    }

    /// Deliver a key-up. Only the modifier state is tracked.
    pub fn key_up(&self, event: &KeyEvent) {
        self.modifiers.set(event.modifiers);
    }

    pub fn modifiers(&self) -> Modifiers {
        self.modifiers.get()
    }
}

// =============================================================================
// Tests
// =============================================================================
