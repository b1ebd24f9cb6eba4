//! Option-letter compiler.
//!
//! Options are single letters, some followed by a number:
//! `B` `C` `I`[n] `L`n `M` `T`n `V` `*` `E`. Letters are case-insensitive,
//! unknown letters are skipped and a malformed number falls back to its
//! default, so compiling never fails.

use std::time::Duration;

use keyhook_core::types::MAX_SEND_LEVEL;

/// Buffer cap used when no `L` option is given.
pub const DEFAULT_BUFFER_LIMIT: usize = 1023;

/// Per-session capture configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputOptions {
    /// Unmodified Backspace removes the last captured character.
    pub backspace_is_undo: bool,
    /// Match phrases and end characters compare case-sensitively.
    pub case_sensitive: bool,
    /// A phrase anywhere in the buffer counts as a match.
    pub find_anywhere: bool,
    /// Single-character end keys are matched by produced character.
    pub end_char_mode: bool,
    /// Keys pressed with Ctrl, Alt or Win are still transcribed.
    pub transcribe_modified_keys: bool,
    pub visible_text: bool,
    pub visible_non_text: bool,
    pub notify_non_text: bool,
    /// Events below this send level are not captured.
    pub min_send_level: u8,
    /// Maximum number of characters kept in the buffer.
    pub buffer_limit: usize,
    /// Timeout in milliseconds; zero disables it.
    pub timeout_ms: u32,
}

impl Default for InputOptions {
    fn default() -> Self {
        Self {
            backspace_is_undo: true,
            case_sensitive: false,
            find_anywhere: false,
            end_char_mode: false,
            transcribe_modified_keys: false,
            visible_text: false,
            visible_non_text: true,
            notify_non_text: false,
            min_send_level: 0,
            buffer_limit: DEFAULT_BUFFER_LIMIT,
            timeout_ms: 0,
        }
    }
}

impl InputOptions {
    /// Compile an option string on top of the defaults.
    pub fn parse(options: &str) -> Self {
        let mut compiled = Self::default();
        compiled.apply(options);
        compiled
    }

    /// Apply an option string on top of the current values.
    pub fn apply(&mut self, options: &str) {
        for (i, c) in options.char_indices() {
            let rest = &options[i + c.len_utf8()..];
            match c.to_ascii_uppercase() {
                'B' => self.backspace_is_undo = false,
                'C' => self.case_sensitive = true,
                'I' => {
                    self.min_send_level = if rest.starts_with(|d: char| d.is_ascii_digit()) {
                        atoi(rest).clamp(0, i64::from(MAX_SEND_LEVEL)) as u8
                    } else {
                        1
                    };
                }
                'M' => self.transcribe_modified_keys = true,
                'L' => {
                    self.buffer_limit = usize::try_from(atoi(rest).max(0)).unwrap_or(usize::MAX);
                }
                'T' => self.set_timeout_secs(atof(rest)),
                'V' => {
                    self.visible_text = true;
                    self.visible_non_text = true;
                }
                '*' => self.find_anywhere = true,
                'E' => self.end_char_mode = true,
                _ => {}
            }
        }
    }

    /// Set the timeout from a value in seconds. Non-positive values disable it.
    pub fn set_timeout_secs(&mut self, seconds: f64) {
        let ms = (seconds * 1000.0).trunc();
        self.timeout_ms = if ms.is_nan() || ms <= 0.0 {
            0
        } else if ms >= f64::from(u32::MAX) {
            u32::MAX
        } else {
            ms as u32
        };
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(u64::from(self.timeout_ms)))
    }
}

/// Leading decimal integer, C `atoi` style: optional whitespace and sign,
/// stops at the first non-digit, 0 when there are no digits.
fn atoi(text: &str) -> i64 {
    let text = text.trim_start();
    let (negative, digits) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let mut value: i64 = 0;
    for b in digits.bytes().take_while(u8::is_ascii_digit) {
        value = value.saturating_mul(10).saturating_add(i64::from(b - b'0'));
    }
    if negative {
        -value
    } else {
        value
    }
}

/// Leading decimal number with optional fraction, 0.0 when there is none.
fn atof(text: &str) -> f64 {
    let text = text.trim_start();
    let mut end = 0;
    let bytes = text.as_bytes();
    if matches!(bytes.first(), Some(b'-') | Some(b'+')) {
        end = 1;
    }
    let mut seen_dot = false;
    while let Some(&b) = bytes.get(end) {
        match b {
            b'0'..=b'9' => end += 1,
            b'.' if !seen_dot => {
                seen_dot = true;
                end += 1;
            }
            _ => break,
        }
    }
    text[..end].parse().unwrap_or(0.0)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = InputOptions::parse("");
        assert_eq!(options, InputOptions::default());
        assert!(options.backspace_is_undo);
        assert!(!options.visible_text);
        assert!(options.visible_non_text);
        assert_eq!(options.buffer_limit, DEFAULT_BUFFER_LIMIT);
        assert_eq!(options.timeout(), None);
    }

    #[test]
    fn test_parse_all_letters() {
        let options = InputOptions::parse("B C I3 L20 M T1.5 V * E");
        assert!(!options.backspace_is_undo);
        assert!(options.case_sensitive);
        assert_eq!(options.min_send_level, 3);
        assert_eq!(options.buffer_limit, 20);
        assert!(options.transcribe_modified_keys);
        assert_eq!(options.timeout_ms, 1500);
        assert!(options.visible_text);
        assert!(options.visible_non_text);
        assert!(options.find_anywhere);
        assert!(options.end_char_mode);
    }

    #[test]
    fn test_idempotent_and_case_insensitive() {
        let first = InputOptions::parse("T2.5 C L50");
        let second = InputOptions::parse("T2.5 C L50");
        let lower = InputOptions::parse("t2.5 c l50");
        assert_eq!(first, second);
        assert_eq!(first, lower);
        assert_eq!(first.timeout_ms, 2500);
        assert_eq!(first.buffer_limit, 50);
        assert!(first.case_sensitive);

        let mut reapplied = first.clone();
        reapplied.apply("T2.5 C L50");
        assert_eq!(reapplied, first);
    }

    #[test]
    fn test_unknown_letters_ignored() {
        assert_eq!(InputOptions::parse("QXZ!?"), InputOptions::default());
    }

    #[test]
    fn test_send_level_default_and_clamp() {
        assert_eq!(InputOptions::parse("I").min_send_level, 1);
        assert_eq!(InputOptions::parse("I L5").min_send_level, 1);
        assert_eq!(InputOptions::parse("I0").min_send_level, 0);
        assert_eq!(InputOptions::parse("I250").min_send_level, MAX_SEND_LEVEL);
    }

    #[test]
    fn test_malformed_numbers_fall_back() {
        assert_eq!(InputOptions::parse("L").buffer_limit, 0);
        assert_eq!(InputOptions::parse("L-5").buffer_limit, 0);
        assert_eq!(InputOptions::parse("Tabc").timeout_ms, 0);
        assert_eq!(InputOptions::parse("T-2").timeout_ms, 0);
        assert_eq!(InputOptions::parse("T.25").timeout_ms, 250);
    }

    #[test]
    fn test_later_option_wins() {
        let options = InputOptions::parse("L10 L30 T1 T0");
        assert_eq!(options.buffer_limit, 30);
        assert_eq!(options.timeout(), None);
    }

    #[test]
    fn test_timeout_duration() {
        let options = InputOptions::parse("T0.1");
        assert_eq!(options.timeout(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_atoi_atof_helpers() {
        assert_eq!(atoi("  42xyz"), 42);
        assert_eq!(atoi("-7"), -7);
        assert_eq!(atoi("x1"), 0);
        assert!((atof("2.5.1") - 2.5).abs() < f64::EPSILON);
        assert!((atof("+3") - 3.0).abs() < f64::EPSILON);
        assert_eq!(atof("."), 0.0);
    }
}
