//! Key-name lookup.
//!
//! The capture engine only needs a handful of questions answered about key
//! names; everything layout-specific sits behind [`KeyResolver`]. [`UsKeyboard`]
//! answers them for a US layout and doubles as a keystroke scripter for the
//! CLI and tests.

use keyhook_core::error::{KeyhookError, Result};
use keyhook_core::types::{KeyEvent, Modifiers, Sc, Vk};

/// How a key name resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyName {
    /// Identified by virtual key. `modifiers` are the ones needed to produce
    /// the named character (Shift for `!`, for instance).
    Vk { vk: Vk, modifiers: Modifiers },
    /// Identified by scan code, for keys that share their virtual key with
    /// another key (Enter and NumpadEnter, Up and NumpadUp).
    Sc(Sc),
}

/// External key-name tables.
pub trait KeyResolver: Send + Sync {
    /// Resolve a key name or a single character.
    fn lookup(&self, name: &str) -> Option<KeyName>;

    /// Primary scan code of a virtual key, 0 when unknown.
    fn vk_to_sc(&self, vk: Vk) -> Sc;

    fn vk_to_name(&self, vk: Vk) -> Option<String>;

    fn sc_to_name(&self, sc: Sc) -> Option<String>;

    /// Character a virtual key produces while Shift is held.
    fn shifted_char(&self, vk: Vk) -> Option<char>;
}

// =============================================================================
// US layout
// =============================================================================

struct NamedKey {
    name: &'static str,
    vk: Vk,
    sc: Sc,
    /// Another key shares this virtual key; resolve by scan code.
    shared_vk: bool,
    text: Option<char>,
}

const fn key(name: &'static str, vk: Vk, sc: Sc) -> NamedKey {
    NamedKey {
        name,
        vk,
        sc,
        shared_vk: false,
        text: None,
    }
}

const fn shared(name: &'static str, vk: Vk, sc: Sc) -> NamedKey {
    NamedKey {
        name,
        vk,
        sc,
        shared_vk: true,
        text: None,
    }
}

const fn text(name: &'static str, vk: Vk, sc: Sc, ch: char) -> NamedKey {
    NamedKey {
        name,
        vk,
        sc,
        shared_vk: false,
        text: Some(ch),
    }
}

const fn shared_text(name: &'static str, vk: Vk, sc: Sc, ch: char) -> NamedKey {
    NamedKey {
        name,
        vk,
        sc,
        shared_vk: true,
        text: Some(ch),
    }
}

/// Named keys. Earlier entries win reverse lookups.
const NAMED_KEYS: &[NamedKey] = &[
    shared_text("Enter", 0x0D, 0x01C, '\n'),
    text("Escape", 0x1B, 0x001, '\u{1b}'),
    text("Esc", 0x1B, 0x001, '\u{1b}'),
    text("Tab", 0x09, 0x00F, '\t'),
    text("Space", 0x20, 0x039, ' '),
    key("Backspace", 0x08, 0x00E),
    key("BS", 0x08, 0x00E),
    shared("Delete", 0x2E, 0x153),
    shared("Del", 0x2E, 0x153),
    shared("Insert", 0x2D, 0x152),
    shared("Ins", 0x2D, 0x152),
    shared("Home", 0x24, 0x147),
    shared("End", 0x23, 0x14F),
    shared("PgUp", 0x21, 0x149),
    shared("PgDn", 0x22, 0x151),
    shared("Up", 0x26, 0x148),
    shared("Down", 0x28, 0x150),
    shared("Left", 0x25, 0x14B),
    shared("Right", 0x27, 0x14D),
    key("CapsLock", 0x14, 0x03A),
    key("ScrollLock", 0x91, 0x046),
    key("NumLock", 0x90, 0x145),
    key("PrintScreen", 0x2C, 0x137),
    key("Pause", 0x13, 0x045),
    key("AppsKey", 0x5D, 0x15D),
    key("LShift", 0xA0, 0x02A),
    key("RShift", 0xA1, 0x136),
    key("LCtrl", 0xA2, 0x01D),
    key("RCtrl", 0xA3, 0x11D),
    key("LAlt", 0xA4, 0x038),
    key("RAlt", 0xA5, 0x138),
    key("LWin", 0x5B, 0x15B),
    key("RWin", 0x5C, 0x15C),
    key("Shift", 0x10, 0x02A),
    key("Ctrl", 0x11, 0x01D),
    key("Control", 0x11, 0x01D),
    key("Alt", 0x12, 0x038),
    key("F1", 0x70, 0x03B),
    key("F2", 0x71, 0x03C),
    key("F3", 0x72, 0x03D),
    key("F4", 0x73, 0x03E),
    key("F5", 0x74, 0x03F),
    key("F6", 0x75, 0x040),
    key("F7", 0x76, 0x041),
    key("F8", 0x77, 0x042),
    key("F9", 0x78, 0x043),
    key("F10", 0x79, 0x044),
    key("F11", 0x7A, 0x057),
    key("F12", 0x7B, 0x058),
    key("F13", 0x7C, 0x064),
    key("F14", 0x7D, 0x065),
    key("F15", 0x7E, 0x066),
    key("F16", 0x7F, 0x067),
    key("F17", 0x80, 0x068),
    key("F18", 0x81, 0x069),
    key("F19", 0x82, 0x06A),
    key("F20", 0x83, 0x06B),
    key("F21", 0x84, 0x06C),
    key("F22", 0x85, 0x06D),
    key("F23", 0x86, 0x06E),
    key("F24", 0x87, 0x076),
    text("Numpad0", 0x60, 0x052, '0'),
    text("Numpad1", 0x61, 0x04F, '1'),
    text("Numpad2", 0x62, 0x050, '2'),
    text("Numpad3", 0x63, 0x051, '3'),
    text("Numpad4", 0x64, 0x04B, '4'),
    text("Numpad5", 0x65, 0x04C, '5'),
    text("Numpad6", 0x66, 0x04D, '6'),
    text("Numpad7", 0x67, 0x047, '7'),
    text("Numpad8", 0x68, 0x048, '8'),
    text("Numpad9", 0x69, 0x049, '9'),
    text("NumpadDot", 0x6E, 0x053, '.'),
    text("NumpadMult", 0x6A, 0x037, '*'),
    text("NumpadAdd", 0x6B, 0x04E, '+'),
    text("NumpadSub", 0x6D, 0x04A, '-'),
    text("NumpadDiv", 0x6F, 0x135, '/'),
    shared_text("NumpadEnter", 0x0D, 0x11C, '\n'),
    shared("NumpadDel", 0x2E, 0x053),
    shared("NumpadIns", 0x2D, 0x052),
    shared("NumpadHome", 0x24, 0x047),
    shared("NumpadEnd", 0x23, 0x04F),
    shared("NumpadPgUp", 0x21, 0x049),
    shared("NumpadPgDn", 0x22, 0x051),
    shared("NumpadUp", 0x26, 0x048),
    shared("NumpadDown", 0x28, 0x050),
    shared("NumpadLeft", 0x25, 0x04B),
    shared("NumpadRight", 0x27, 0x04D),
    key("NumpadClear", 0x0C, 0x04C),
];

/// Character keys: (virtual key, scan code, plain char, shifted char).
const CHAR_KEYS: &[(Vk, Sc, char, char)] = &[
    (0x30, 0x00B, '0', ')'),
    (0x31, 0x002, '1', '!'),
    (0x32, 0x003, '2', '@'),
    (0x33, 0x004, '3', '#'),
    (0x34, 0x005, '4', '$'),
    (0x35, 0x006, '5', '%'),
    (0x36, 0x007, '6', '^'),
    (0x37, 0x008, '7', '&'),
    (0x38, 0x009, '8', '*'),
    (0x39, 0x00A, '9', '('),
    (0x41, 0x01E, 'a', 'A'),
    (0x42, 0x030, 'b', 'B'),
    (0x43, 0x02E, 'c', 'C'),
    (0x44, 0x020, 'd', 'D'),
    (0x45, 0x012, 'e', 'E'),
    (0x46, 0x021, 'f', 'F'),
    (0x47, 0x022, 'g', 'G'),
    (0x48, 0x023, 'h', 'H'),
    (0x49, 0x017, 'i', 'I'),
    (0x4A, 0x024, 'j', 'J'),
    (0x4B, 0x025, 'k', 'K'),
    (0x4C, 0x026, 'l', 'L'),
    (0x4D, 0x032, 'm', 'M'),
    (0x4E, 0x031, 'n', 'N'),
    (0x4F, 0x018, 'o', 'O'),
    (0x50, 0x019, 'p', 'P'),
    (0x51, 0x010, 'q', 'Q'),
    (0x52, 0x013, 'r', 'R'),
    (0x53, 0x01F, 's', 'S'),
    (0x54, 0x014, 't', 'T'),
    (0x55, 0x016, 'u', 'U'),
    (0x56, 0x02F, 'v', 'V'),
    (0x57, 0x011, 'w', 'W'),
    (0x58, 0x02D, 'x', 'X'),
    (0x59, 0x015, 'y', 'Y'),
    (0x5A, 0x02C, 'z', 'Z'),
    (0xBA, 0x027, ';', ':'),
    (0xBB, 0x00D, '=', '+'),
    (0xBC, 0x033, ',', '<'),
    (0xBD, 0x00C, '-', '_'),
    (0xBE, 0x034, '.', '>'),
    (0xBF, 0x035, '/', '?'),
    (0xC0, 0x029, '`', '~'),
    (0xDB, 0x01A, '[', '{'),
    (0xDC, 0x02B, '\\', '|'),
    (0xDD, 0x01B, ']', '}'),
    (0xDE, 0x028, '\'', '"'),
];

/// US English keyboard layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsKeyboard;

impl UsKeyboard {
    pub fn new() -> Self {
        Self
    }

    fn named(&self, name: &str) -> Option<&'static NamedKey> {
        NAMED_KEYS.iter().find(|k| k.name.eq_ignore_ascii_case(name))
    }

    /// Key for a literal character: (vk, sc, shift needed).
    fn char_key(&self, ch: char) -> Option<(Vk, Sc, bool)> {
        if ch == ' ' {
            return Some((0x20, 0x039, false));
        }
        CHAR_KEYS.iter().find_map(|&(vk, sc, plain, shifted)| {
            if ch == plain {
                Some((vk, sc, false))
            } else if ch == shifted {
                Some((vk, sc, true))
            } else {
                None
            }
        })
    }

    /// Turn a keystroke script into hook events.
    ///
    /// Literal characters become the key that types them (with Shift when
    /// needed); `{Name}` sends a named key and `{{}` / `{}}` send braces.
    pub fn events_for(&self, script: &str) -> Result<Vec<KeyEvent>> {
        let chars: Vec<char> = script.chars().collect();
        let mut events = Vec::with_capacity(chars.len());
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            if c == '{' {
                let close = chars[i + 1..]
                    .iter()
                    .position(|&x| x == '}')
                    .map(|p| p + i + 1)
                    .ok_or_else(|| KeyhookError::InvalidOption(format!("unclosed '{{' in {script:?}")))?;
                let (name, next) = if close == i + 1 && chars.get(close + 1) == Some(&'}') {
                    ("}".to_string(), close + 2)
                } else {
                    (chars[i + 1..close].iter().collect::<String>(), close + 1)
                };
                events.push(self.event_for_name(&name)?);
                i = next;
                continue;
            }
            events.push(self.event_for_char(c)?);
            i += 1;
        }
        Ok(events)
    }

    fn event_for_char(&self, ch: char) -> Result<KeyEvent> {
        let (vk, sc, shift) = self
            .char_key(ch)
            .ok_or_else(|| KeyhookError::InvalidOption(format!("no key types {ch:?}")))?;
        let event = KeyEvent::new(vk, sc).with_text(ch);
        Ok(if shift {
            event.with_modifiers(Modifiers::LSHIFT)
        } else {
            event
        })
    }

    fn event_for_name(&self, name: &str) -> Result<KeyEvent> {
        let mut chars = name.chars();
        if let (Some(ch), None) = (chars.next(), chars.next()) {
            return self.event_for_char(ch);
        }
        let named = self
            .named(name)
            .ok_or_else(|| KeyhookError::InvalidOption(format!("unknown key name {name:?}")))?;
        let event = KeyEvent::new(named.vk, named.sc);
        Ok(match named.text {
            Some(ch) => event.with_text(ch),
            None => event,
        })
    }
}

impl KeyResolver for UsKeyboard {
    fn lookup(&self, name: &str) -> Option<KeyName> {
        let mut chars = name.chars();
        if let (Some(ch), None) = (chars.next(), chars.next()) {
            if let Some((vk, _, shift)) = self.char_key(ch) {
                let modifiers = if shift {
                    Modifiers::LSHIFT
                } else {
                    Modifiers::NONE
                };
                return Some(KeyName::Vk { vk, modifiers });
            }
        }
        let named = self.named(name)?;
        Some(if named.shared_vk {
            KeyName::Sc(named.sc)
        } else {
            KeyName::Vk {
                vk: named.vk,
                modifiers: Modifiers::NONE,
            }
        })
    }

    fn vk_to_sc(&self, vk: Vk) -> Sc {
        CHAR_KEYS
            .iter()
            .find(|k| k.0 == vk)
            .map(|k| k.1)
            .or_else(|| NAMED_KEYS.iter().find(|k| k.vk == vk).map(|k| k.sc))
            .unwrap_or(0)
    }

    fn vk_to_name(&self, vk: Vk) -> Option<String> {
        if let Some(k) = CHAR_KEYS.iter().find(|k| k.0 == vk) {
            return Some(k.2.to_string());
        }
        NAMED_KEYS
            .iter()
            .find(|k| k.vk == vk)
            .map(|k| k.name.to_string())
    }

    fn sc_to_name(&self, sc: Sc) -> Option<String> {
        if let Some(k) = NAMED_KEYS.iter().find(|k| k.sc == sc) {
            return Some(k.name.to_string());
        }
        CHAR_KEYS
            .iter()
            .find(|k| k.1 == sc)
            .map(|k| k.2.to_string())
    }

    fn shifted_char(&self, vk: Vk) -> Option<char> {
        CHAR_KEYS.iter().find(|k| k.0 == vk).map(|k| k.3)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_named_keys() {
        let kb = UsKeyboard::new();
        assert_eq!(
            kb.lookup("Tab"),
            Some(KeyName::Vk {
                vk: 0x09,
                modifiers: Modifiers::NONE
            })
        );
        assert_eq!(kb.lookup("escape"), kb.lookup("ESCAPE"));
        assert_eq!(kb.lookup("F24").map(|k| matches!(k, KeyName::Vk { vk: 0x87, .. })), Some(true));
        assert_eq!(kb.lookup("NoSuchKey"), None);
    }

    #[test]
    fn test_shared_vk_keys_resolve_by_sc() {
        let kb = UsKeyboard::new();
        assert_eq!(kb.lookup("Enter"), Some(KeyName::Sc(0x01C)));
        assert_eq!(kb.lookup("NumpadEnter"), Some(KeyName::Sc(0x11C)));
        assert_eq!(kb.lookup("Up"), Some(KeyName::Sc(0x148)));
        assert_eq!(kb.lookup("NumpadUp"), Some(KeyName::Sc(0x048)));
    }

    #[test]
    fn test_lookup_single_chars() {
        let kb = UsKeyboard::new();
        assert_eq!(
            kb.lookup("1"),
            Some(KeyName::Vk {
                vk: 0x31,
                modifiers: Modifiers::NONE
            })
        );
        assert_eq!(
            kb.lookup("!"),
            Some(KeyName::Vk {
                vk: 0x31,
                modifiers: Modifiers::LSHIFT
            })
        );
        assert_eq!(
            kb.lookup("A"),
            Some(KeyName::Vk {
                vk: 0x41,
                modifiers: Modifiers::LSHIFT
            })
        );
        assert_eq!(kb.lookup("é"), None);
    }

    #[test]
    fn test_reverse_lookups() {
        let kb = UsKeyboard::new();
        assert_eq!(kb.vk_to_sc(0x41), 0x01E);
        assert_eq!(kb.vk_to_sc(0x0D), 0x01C);
        assert_eq!(kb.vk_to_sc(0xFF), 0);
        assert_eq!(kb.vk_to_name(0xBE).as_deref(), Some("."));
        assert_eq!(kb.vk_to_name(0x70).as_deref(), Some("F1"));
        assert_eq!(kb.sc_to_name(0x11C).as_deref(), Some("NumpadEnter"));
        assert_eq!(kb.sc_to_name(0x01C).as_deref(), Some("Enter"));
        assert_eq!(kb.shifted_char(0x31), Some('!'));
        assert_eq!(kb.shifted_char(0x70), None);
    }

    #[test]
    fn test_events_for_literal_text() {
        let kb = UsKeyboard::new();
        let events = kb.events_for("hI.").unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].vk, 0x48);
        assert_eq!(events[0].text, Some('h'));
        assert!(events[0].modifiers.is_empty());
        assert_eq!(events[1].text, Some('I'));
        assert!(events[1].modifiers.shift());
        assert_eq!(events[2].vk, 0xBE);
    }

    #[test]
    fn test_events_for_named_and_braces() {
        let kb = UsKeyboard::new();
        let events = kb.events_for("{Enter}{{}{}}{F1}").unwrap();
        assert_eq!(events.len(), 4);
        assert_eq!((events[0].vk, events[0].sc), (0x0D, 0x01C));
        assert_eq!(events[0].text, Some('\n'));
        assert_eq!(events[1].text, Some('{'));
        assert_eq!(events[2].text, Some('}'));
        assert_eq!(events[3].text, None);
    }

    #[test]
    fn test_events_for_errors() {
        let kb = UsKeyboard::new();
        assert!(matches!(
            kb.events_for("{Bogus}"),
            Err(KeyhookError::InvalidOption(_))
        ));
        assert!(kb.events_for("abc{Enter").is_err());
        assert!(kb.events_for("€").is_err());
    }
}
