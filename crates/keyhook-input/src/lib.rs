//! Keyhook Input crate - the keystroke-capture engine.
//!
//! A capture session is compiled from three strings (options, end keys and
//! match phrases), started onto the runtime's active stack and fed keystrokes
//! from a hook thread until an end key, a match, the buffer limit, a timeout
//! or cancellation ends it. Termination is signalled from the hook thread
//! through a relay channel and completed on the owning thread.

pub mod hook;
pub mod keyclass;
pub mod keys;
pub mod matchlist;
pub mod options;
pub mod relay;
pub mod report;
pub mod runtime;
pub mod scheduler;
pub mod session;

pub use hook::{HookFeed, HookView, KeyDisposition};
pub use keys::{KeyName, KeyResolver, UsKeyboard};
pub use options::InputOptions;
pub use relay::{RelayEvent, RelayReceiver};
pub use report::EndReport;
pub use runtime::{Host, InputRuntime, NoopHost, Released};
pub use scheduler::{ManualTimer, TimerService, TimerTicks, TokioTimer};
pub use session::{InputOwner, InputStatus, OwnerHandle, Session};
