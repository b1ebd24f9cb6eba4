//! Session arena, active-session stack and release processing.
//!
//! [`InputRuntime`] lives on the owning thread. It is the only writer of the
//! stack links and the only place owner references are taken or dropped.
//! The hook thread sees the stack solely through the view published into
//! the [`HookSlot`] whenever the top changes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

use keyhook_core::config::KeyhookConfig;
use keyhook_core::error::{KeyhookError, Result};
use keyhook_core::events::CaptureEvent;
use keyhook_core::types::{SessionId, Timestamp};

use crate::hook::{HookFeed, HookSlot, HookView, LogicalModifiers};
use crate::keys::KeyResolver;
use crate::relay::{self, RelayEvent, RelayReceiver, RelaySender};
use crate::report::EndReport;
use crate::scheduler::{TimeoutScheduler, TimerService};
use crate::session::{InputStatus, OwnerHandle, Session};

// =============================================================================
// Host seam
// =============================================================================

/// The keyboard-hook installer and process lifetime, supplied by the host.
pub trait Host: Send {
    fn install_keyboard_hook(&mut self) {}

    /// Called after each release; `still_needed` is false once the stack is
    /// empty.
    fn maybe_uninstall_keyboard_hook(&mut self, _still_needed: bool) {}

    /// A lifetime reference was dropped; `active` sessions remain.
    fn exit_if_not_persistent(&mut self, _active: usize) {}
}

/// Host that does nothing.
#[derive(Debug, Default)]
pub struct NoopHost;

impl Host for NoopHost {}

/// A released session whose owner asked for an end callback. The caller
/// runs the callback and then hands this back through
/// [`InputRuntime::finish_callback`].
#[derive(Debug)]
pub struct Released {
    pub session: SessionId,
    pub owner: OwnerHandle,
}

// =============================================================================
// Runtime
// =============================================================================

pub struct InputRuntime {
    resolver: Arc<dyn KeyResolver>,
    sessions: HashMap<SessionId, Session>,
    next_id: u64,
    top: Option<SessionId>,
    slot: HookSlot,
    modifiers: LogicalModifiers,
    relay: RelaySender,
    scheduler: TimeoutScheduler,
    host: Box<dyn Host>,
    events: Option<broadcast::Sender<CaptureEvent>>,
    uninstall_when_idle: bool,
    hook_installed: bool,
}

impl std::fmt::Debug for InputRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputRuntime")
            .field("sessions", &self.sessions.len())
            .field("top", &self.top)
            .field("scheduler", &self.scheduler)
            .field("hook_installed", &self.hook_installed)
            .finish()
    }
}

impl InputRuntime {
    /// Create a runtime and the receiving end of its termination relay.
    pub fn new(
        resolver: Arc<dyn KeyResolver>,
        timer: Box<dyn TimerService>,
        host: Box<dyn Host>,
    ) -> (Self, RelayReceiver) {
        let (relay, rx) = relay::channel();
        let runtime = Self {
            resolver,
            sessions: HashMap::new(),
            next_id: 1,
            top: None,
            slot: HookSlot::new(),
            modifiers: LogicalModifiers::new(),
            relay,
            scheduler: TimeoutScheduler::new(timer),
            host,
            events: None,
            uninstall_when_idle: true,
            hook_installed: false,
        };
        (runtime, rx)
    }

    /// Apply the scheduler and hook settings from a loaded configuration.
    pub fn configure(&mut self, config: &KeyhookConfig) {
        self.scheduler
            .set_granularity(Duration::from_millis(config.scheduler.granularity_ms));
        self.uninstall_when_idle = config.hook.uninstall_when_idle;
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&mut self) -> broadcast::Receiver<CaptureEvent> {
        match &self.events {
            Some(tx) => tx.subscribe(),
            None => {
                let (tx, rx) = broadcast::channel(64);
                self.events = Some(tx);
                rx
            }
        }
    }

    fn emit(&self, event: CaptureEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Handle for the hook thread.
    pub fn hook_feed(&self) -> HookFeed {
        HookFeed::new(self.slot.clone(), self.modifiers.clone())
    }

    pub fn resolver(&self) -> &Arc<dyn KeyResolver> {
        &self.resolver
    }

    // -------------------------------------------------------------------------
    // Lookup
    // -------------------------------------------------------------------------

    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    fn get(&self, id: SessionId) -> Result<&Session> {
        self.sessions.get(&id).ok_or(KeyhookError::UnknownSession(id.0))
    }

    fn get_mut(&mut self, id: SessionId) -> Result<&mut Session> {
        self.sessions
            .get_mut(&id)
            .ok_or(KeyhookError::UnknownSession(id.0))
    }

    pub fn status(&self, id: SessionId) -> Result<InputStatus> {
        Ok(self.get(id)?.status())
    }

    /// Text captured so far; readable mid-capture.
    pub fn input(&self, id: SessionId) -> Result<String> {
        Ok(self.get(id)?.input())
    }

    pub fn end_reason(&self, id: SessionId) -> Result<EndReport> {
        Ok(EndReport::for_session(self.get(id)?, self.resolver.as_ref()))
    }

    /// Session ids from the top of the stack down.
    pub fn stack(&self) -> Vec<SessionId> {
        let mut order = Vec::new();
        let mut cursor = self.top;
        while let Some(id) = cursor {
            order.push(id);
            cursor = self.sessions.get(&id).and_then(|s| s.prev);
        }
        order
    }

    pub fn active_count(&self) -> usize {
        self.stack().len()
    }

    /// The active session owned by `owner`.
    pub fn find(&self, owner: &OwnerHandle) -> Option<SessionId> {
        let mut cursor = self.top;
        while let Some(id) = cursor {
            let session = self.sessions.get(&id)?;
            if session.owner.as_ref().is_some_and(|o| o.same_owner(owner)) {
                return Some(id);
            }
            cursor = session.prev;
        }
        None
    }

    fn is_linked(&self, id: SessionId) -> bool {
        self.stack().contains(&id)
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Compile a new session. Nothing is allocated in the arena on failure.
    pub fn setup(
        &mut self,
        options: &str,
        end_keys: &str,
        match_list: &str,
        owner: Option<OwnerHandle>,
    ) -> Result<SessionId> {
        let id = SessionId(self.next_id);
        let session = Session::setup(
            id,
            options,
            end_keys,
            match_list,
            owner,
            self.resolver.as_ref(),
        )?;
        self.next_id += 1;
        tracing::debug!(session = %id, options, end_keys, "session set up");
        self.sessions.insert(id, session);
        Ok(id)
    }

    /// Begin capturing. Starting a session already in progress does nothing.
    pub fn start(&mut self, id: SessionId) -> Result<()> {
        if self.get(id)?.in_progress() {
            return Ok(());
        }
        // A previous run may still be linked with its relay not yet drained.
        self.unlink_if_stopped(id);

        let now = Instant::now();
        let prev = self.top;
        let logical = self.modifiers.clone();
        let relay = self.relay.clone();
        let session = self.get_mut(id)?;
        if session.keepalive.is_none() {
            session.keepalive = session.owner.clone();
        }
        session.begin_run(logical, relay);
        session.timeout_at = session.options().timeout().map(|t| now + t);
        session.prev = prev;
        let deadline = session.timeout_at;
        let timeout_ms = session.options().timeout_ms;

        self.top = Some(id);
        self.publish();
        if let Some(deadline) = deadline {
            self.scheduler.schedule(deadline, now);
        }
        if !self.hook_installed {
            self.host.install_keyboard_hook();
            self.hook_installed = true;
            self.emit(CaptureEvent::HookInstalled {
                timestamp: Timestamp::now(),
            });
        }

        tracing::info!(session = %id, timeout_ms, "capture started");
        self.emit(CaptureEvent::SessionStarted {
            session: id,
            timeout_ms,
            timestamp: Timestamp::now(),
        });
        Ok(())
    }

    /// Stop capturing through the normal termination path. Returns whether
    /// this call ended the run.
    pub fn cancel(&mut self, id: SessionId) -> Result<bool> {
        Ok(self
            .get(id)?
            .run_state()
            .is_some_and(|state| state.end_by_reason(InputStatus::Off)))
    }

    /// Unlink `id` if it has stopped. Returns whether `id` was on the stack.
    pub fn unlink_if_stopped(&mut self, id: SessionId) -> bool {
        let Some(target) = self.sessions.get(&id) else {
            return false;
        };
        let stopped = !target.in_progress();
        let next = target.prev;

        if self.top == Some(id) {
            if stopped {
                self.top = next;
                self.clear_prev(id);
                self.publish();
                tracing::debug!(session = %id, "unlinked from top");
            }
            return true;
        }

        let mut cursor = self.top;
        while let Some(current) = cursor {
            let Some(node) = self.sessions.get_mut(&current) else {
                break;
            };
            if node.prev == Some(id) {
                if stopped {
                    node.prev = next;
                    self.clear_prev(id);
                    tracing::debug!(session = %id, above = %current, "unlinked");
                }
                return true;
            }
            cursor = node.prev;
        }
        false
    }

    fn clear_prev(&mut self, id: SessionId) {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.prev = None;
        }
    }

    /// Process one termination relay event.
    ///
    /// Returns the session when its owner wants an end callback; the owner
    /// reference then travels with it.
    pub fn release(&mut self, event: RelayEvent) -> Option<Released> {
        let id = event.session;
        // A relay from an earlier run must not unlink the current one.
        if let Some(session) = self.sessions.get(&id) {
            if session.run != event.run {
                tracing::debug!(session = %id, run = event.run, current = session.run, "relay for superseded run ignored");
                return None;
            }
        }
        if !self.unlink_if_stopped(id) {
            tracing::debug!(session = %id, run = event.run, "stale relay dropped");
            self.emit(CaptureEvent::StaleRelayDropped {
                session: id,
                timestamp: Timestamp::now(),
            });
            return None;
        }
        let session = self.sessions.get(&id)?;
        if session.in_progress() {
            return None;
        }

        let reason = session.status().label();
        let had_timeout = session.timeout_at.is_some();
        tracing::info!(session = %id, reason, "capture ended");
        self.emit(CaptureEvent::SessionEnded {
            session: id,
            reason: reason.to_string(),
            timestamp: Timestamp::now(),
        });

        if had_timeout {
            self.rearm_timer(Instant::now());
        }

        if self.uninstall_when_idle {
            let still_needed = self.top.is_some();
            self.host.maybe_uninstall_keyboard_hook(still_needed);
            if !still_needed && self.hook_installed {
                self.hook_installed = false;
                self.emit(CaptureEvent::HookUninstalled {
                    timestamp: Timestamp::now(),
                });
            }
        }

        let keepalive = self.sessions.get_mut(&id).and_then(|s| s.keepalive.take());
        let needs_callback = keepalive.as_ref().is_some_and(OwnerHandle::has_on_end);
        self.emit(CaptureEvent::SessionReleased {
            session: id,
            needs_callback,
            timestamp: Timestamp::now(),
        });
        match keepalive {
            Some(owner) if needs_callback => Some(Released { session: id, owner }),
            other => {
                drop(other);
                self.host.exit_if_not_persistent(self.active_count());
                None
            }
        }
    }

    /// Drop the reference carried by a [`Released`] once its callback ran.
    pub fn finish_callback(&mut self, released: Released) {
        drop(released);
        self.host.exit_if_not_persistent(self.active_count());
    }

    /// Release everything currently queued on the relay.
    pub fn drain(&mut self, rx: &mut RelayReceiver) -> Vec<Released> {
        let mut callbacks = Vec::new();
        while let Some(event) = rx.try_recv() {
            callbacks.extend(self.release(event));
        }
        callbacks
    }

    /// Remove a finished session from the arena.
    pub fn discard(&mut self, id: SessionId) -> Result<()> {
        if self.get(id)?.in_progress() {
            return Err(KeyhookError::Session(format!(
                "session {id} is still capturing"
            )));
        }
        if self.is_linked(id) {
            return Err(KeyhookError::Session(format!(
                "session {id} has not been released"
            )));
        }
        self.sessions.remove(&id);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Properties
    // -------------------------------------------------------------------------

    /// Update per-key options on a session's tables.
    pub fn key_opt(&mut self, id: SessionId, keys: &str, options: &str) -> Result<()> {
        let resolver = Arc::clone(&self.resolver);
        self.get_mut(id)?
            .compiled_mut()
            .keys
            .apply_key_options(keys, options, resolver.as_ref())?;
        if self.top == Some(id) {
            self.publish();
        }
        Ok(())
    }

    /// Change the timeout. A running session gets a fresh deadline from now.
    pub fn set_timeout(&mut self, id: SessionId, seconds: f64) -> Result<()> {
        let now = Instant::now();
        let session = self.get_mut(id)?;
        session.compiled_mut().options.set_timeout_secs(seconds);
        let timeout = session.options().timeout();
        if !session.in_progress() {
            return Ok(());
        }
        session.timeout_at = timeout.map(|t| now + t);
        let deadline = session.timeout_at;
        if let Some(deadline) = deadline {
            self.scheduler.schedule(deadline, now);
        }
        if self.top == Some(id) {
            self.publish();
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Timer
    // -------------------------------------------------------------------------

    /// Timer callback: end every session whose deadline has passed, then
    /// re-arm for the soonest one left. Returns how many sessions timed out.
    pub fn on_timer(&mut self, now: Instant) -> usize {
        self.scheduler.fired();
        let mut fired = Vec::new();
        for session in self.sessions.values() {
            let due = session.in_progress() && session.timeout_at.is_some_and(|at| at <= now);
            if due
                && session
                    .run_state()
                    .is_some_and(|state| state.end_by_reason(InputStatus::TimedOut))
            {
                fired.push(session.id);
            }
        }
        for &id in &fired {
            tracing::debug!(session = %id, "timeout fired");
            self.emit(CaptureEvent::TimeoutFired {
                session: id,
                timestamp: Timestamp::now(),
            });
        }
        self.rearm_timer(now);
        fired.len()
    }

    fn rearm_timer(&mut self, now: Instant) {
        let next = self
            .sessions
            .values()
            .filter(|s| s.in_progress())
            .filter_map(|s| s.timeout_at)
            .min();
        self.scheduler.rearm(next, now);
    }

    pub fn scheduler(&self) -> &TimeoutScheduler {
        &self.scheduler
    }

    // -------------------------------------------------------------------------
    // Publishing
    // -------------------------------------------------------------------------

    fn publish(&self) {
        let view = self.top.and_then(|id| {
            let session = self.sessions.get(&id)?;
            let state = session.run_state()?;
            Some(Arc::new(HookView::new(
                id,
                Arc::clone(&session.compiled),
                Arc::clone(state),
                Arc::clone(&session.buffer),
            )))
        });
        self.slot.publish(view);
    }
}

// =============================================================================
// Tests
// =============================================================================
