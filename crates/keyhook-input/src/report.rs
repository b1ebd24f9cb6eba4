//! End-of-capture reporting.

use serde::Serialize;

use crate::keys::KeyResolver;
use crate::session::{EndingDetail, InputStatus, Session};

/// How a session ended and what it captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndReport {
    /// `Stopped`, `Timeout`, `Match`, `EndKey`, `Max`, or empty while running.
    pub reason: String,
    /// Display name of the end key or end char.
    pub end_key: Option<String>,
    /// Modifiers logically down at the end, in `<^>!` notation.
    pub end_mods: String,
    /// The phrase that matched.
    pub matched: Option<String>,
    pub input: String,
}

impl EndReport {
    pub fn for_session(session: &Session, resolver: &dyn KeyResolver) -> Self {
        let status = session.status();
        let detail = session.ending();
        let end_key = (status == InputStatus::EndedByKey).then(|| end_key_name(&detail, resolver));
        let matched = if status == InputStatus::Matched {
            session
                .compiled()
                .matches
                .phrase(detail.match_index)
                .map(str::to_string)
        } else {
            None
        };
        let end_mods = if status == InputStatus::InProgress {
            String::new()
        } else {
            detail.modifiers.to_mod_string()
        };
        Self {
            reason: status.label().to_string(),
            end_key,
            end_mods,
            matched,
            input: session.input(),
        }
    }
}

/// Best-effort display name for whatever ended the capture.
pub fn end_key_name(detail: &EndingDetail, resolver: &dyn KeyResolver) -> String {
    if let Some(ch) = detail.ch {
        return ch.to_string();
    }
    if detail.required_shift {
        if let Some(ch) = resolver.shifted_char(detail.vk) {
            return ch.to_string();
        }
    }
    if detail.by_sc {
        if let Some(name) = resolver.sc_to_name(detail.sc) {
            return name;
        }
    }
    if detail.vk != 0 {
        if let Some(name) = resolver.vk_to_name(detail.vk) {
            return name;
        }
    }
    if detail.by_sc || detail.vk == 0 {
        format!("sc{:03X}", detail.sc)
    } else {
        format!("vk{:02X}", detail.vk)
    }
}
