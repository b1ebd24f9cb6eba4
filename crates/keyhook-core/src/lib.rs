pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use config::KeyhookConfig;
pub use error::{KeyhookError, Result};
pub use events::CaptureEvent;
pub use types::*;
