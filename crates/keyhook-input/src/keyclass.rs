//! Key-class tables and their compiler.
//!
//! Each session carries one flag byte per virtual key and per scan code.
//! The end-key bits say whether a key ends capture and under which Shift
//! state; the remaining bits are per-key options set through `key_opt`.

use keyhook_core::error::{KeyhookError, Result};
use keyhook_core::types::{Modifiers, Sc, Vk, SC_ARRAY_COUNT, VK_ARRAY_COUNT};

use crate::keys::{KeyName, KeyResolver};

/// End key only while Shift is down.
pub const END_KEY_WITH_SHIFT: u8 = 0x01;
/// End key only while Shift is up.
pub const END_KEY_WITHOUT_SHIFT: u8 = 0x02;
/// End key regardless of Shift.
pub const END_KEY_ENABLED: u8 = END_KEY_WITH_SHIFT | END_KEY_WITHOUT_SHIFT;
pub const END_KEY_MASK: u8 = END_KEY_ENABLED;
/// Keystroke is never transcribed into the buffer.
pub const KEY_IGNORE_TEXT: u8 = 0x04;
/// Keystroke is reported to the notify callback.
pub const KEY_NOTIFY: u8 = 0x08;
/// Keystroke is let through to the active window.
pub const KEY_VISIBLE: u8 = 0x10;
/// `KEY_VISIBLE` overrides the session-wide visibility defaults.
pub const KEY_VISIBILITY_OVERRIDE: u8 = 0x20;
pub const KEY_OPTION_MASK: u8 = 0x3F;

/// How [`KeyClassTables::apply_keys`] treats the keys it finds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyFlags {
    /// Bare punctuation gets Shift-sensitive end-key bits.
    pub end_key_mode: bool,
    pub remove: u8,
    pub add: u8,
}

impl KeyFlags {
    /// Flags for compiling an end-keys string.
    pub fn end_keys() -> Self {
        Self {
            end_key_mode: true,
            remove: 0,
            add: END_KEY_ENABLED,
        }
    }

    /// Flags for a `key_opt` update.
    pub fn options(remove: u8, add: u8) -> Self {
        Self {
            end_key_mode: false,
            remove,
            add,
        }
    }
}

/// Result of testing a keystroke against the end-key bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndKeyHit {
    /// The scan-code table, not the virtual-key table, named this key.
    pub by_sc: bool,
    /// Shift was required and was down.
    pub required_shift: bool,
}

/// Per-session flag maps, indexed by virtual key and by scan code.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyClassTables {
    by_vk: Box<[u8; VK_ARRAY_COUNT]>,
    by_sc: Box<[u8; SC_ARRAY_COUNT]>,
}

impl Default for KeyClassTables {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for KeyClassTables {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyClassTables")
            .field("vk_entries", &self.by_vk.iter().filter(|&&b| b != 0).count())
            .field("sc_entries", &self.by_sc.iter().filter(|&&b| b != 0).count())
            .finish()
    }
}

impl KeyClassTables {
    pub fn new() -> Self {
        Self {
            by_vk: Box::new([0; VK_ARRAY_COUNT]),
            by_sc: Box::new([0; SC_ARRAY_COUNT]),
        }
    }

    pub fn vk(&self, vk: Vk) -> u8 {
        self.by_vk[usize::from(vk)]
    }

    pub fn sc(&self, sc: Sc) -> u8 {
        self.by_sc.get(usize::from(sc)).copied().unwrap_or(0)
    }

    /// Combined flags for a keystroke.
    pub fn flags(&self, vk: Vk, sc: Sc) -> u8 {
        self.vk(vk) | self.sc(sc)
    }

    /// Test a keystroke against the end-key bits under the given Shift state.
    ///
    /// A key whose entry carries exactly one of the Shift bits ends capture
    /// only under that Shift state; with both bits it ends capture either way.
    pub fn end_key(&self, vk: Vk, sc: Sc, modifiers: Modifiers) -> Option<EndKeyHit> {
        let vk_end = self.vk(vk) & END_KEY_MASK;
        let sc_end = self.sc(sc) & END_KEY_MASK;
        let end = vk_end | sc_end;
        if end == 0 {
            return None;
        }
        let with_shift = end & END_KEY_WITH_SHIFT != 0;
        let without_shift = end & END_KEY_WITHOUT_SHIFT != 0;
        let shift_matters = with_shift != without_shift;
        let shift = modifiers.shift();
        if shift_matters && with_shift != shift {
            return None;
        }
        Some(EndKeyHit {
            by_sc: vk_end == 0,
            required_shift: with_shift && shift,
        })
    }

    /// Apply `add`/`remove` to every entry of both tables.
    pub fn apply_all(&mut self, remove: u8, add: u8) {
        for entry in self.by_vk.iter_mut().chain(self.by_sc.iter_mut()) {
            *entry = (*entry & !remove) | add;
        }
    }

    fn update_sc(&mut self, sc: Sc, remove: u8, add: u8) {
        if let Some(entry) = self.by_sc.get_mut(usize::from(sc)) {
            *entry = (*entry & !remove) | add;
        }
    }

    /// Compile a keys string into the tables.
    ///
    /// `{Name}` names a key, `{vkNN}` / `{scNNN}` give codes in hex and any
    /// other character names the key that types it. An unclosed `{` and an
    /// empty `{}` are skipped; `}` on its own is ignored. With `end_char_mode`
    /// single-character keys are left for the end-char buffer instead.
    ///
    /// Returns the number of single-character keys left for the end-char
    /// buffer.
    pub fn apply_keys(
        &mut self,
        keys: &str,
        flags: KeyFlags,
        end_char_mode: bool,
        resolver: &dyn KeyResolver,
    ) -> usize {
        let end_char_mode = end_char_mode && flags.end_key_mode;
        let chars: Vec<char> = keys.chars().collect();
        let mut single_char_count = 0;
        let mut i = 0;

        while i < chars.len() {
            let mut vk: Vk = 0;
            let mut sc: Sc = 0;
            let mut vk_by_number = false;
            let mut sc_by_number = false;
            let mut modifiers = Modifiers::NONE;
            let single_char: Option<char>;

            match chars[i] {
                '}' => {
                    i += 1;
                    continue;
                }
                '{' => {
                    let Some(close) = chars[i + 1..].iter().position(|&c| c == '}') else {
                        i += 1;
                        continue;
                    };
                    let close = close + i + 1;
                    let mut end = close;
                    if close == i + 1 {
                        if chars.get(close + 1) == Some(&'}') {
                            end = close + 1;
                        } else {
                            i += 1;
                            continue;
                        }
                    }
                    if end == i + 2 {
                        if end_char_mode {
                            single_char_count += 1;
                            i = end + 1;
                            continue;
                        }
                        single_char = Some(chars[i + 1]);
                    } else {
                        single_char = None;
                    }

                    let name: String = chars[i + 1..end].iter().collect();
                    if let Some(code) = parse_code(&name, "vk").and_then(|v| Vk::try_from(v).ok()) {
                        vk = code;
                        vk_by_number = true;
                    } else if let Some(code) = parse_code(&name, "sc") {
                        sc = code;
                        sc_by_number = true;
                    } else {
                        match resolver.lookup(&name) {
                            Some(KeyName::Vk { vk: v, modifiers: m }) => {
                                vk = v;
                                modifiers = m;
                            }
                            Some(KeyName::Sc(s)) => sc = s,
                            None => {}
                        }
                    }
                    i = end + 1;
                }
                c => {
                    i += 1;
                    if end_char_mode {
                        single_char_count += 1;
                        continue;
                    }
                    single_char = Some(c);
                    let mut buf = [0u8; 4];
                    match resolver.lookup(c.encode_utf8(&mut buf)) {
                        Some(KeyName::Vk { vk: v, modifiers: m }) => {
                            vk = v;
                            modifiers = m;
                        }
                        Some(KeyName::Sc(s)) => sc = s,
                        None => {}
                    }
                }
            }

            if vk != 0 {
                let shift_sensitive = flags.end_key_mode
                    && single_char.is_some_and(|c| !c.is_alphabetic());
                if shift_sensitive {
                    // Digits and punctuation type different symbols with Shift.
                    self.by_vk[usize::from(vk)] |= if modifiers.shift() {
                        END_KEY_WITH_SHIFT
                    } else {
                        END_KEY_WITHOUT_SHIFT
                    };
                } else {
                    let entry = &mut self.by_vk[usize::from(vk)];
                    *entry = (*entry & !flags.remove) | flags.add;
                    if flags.remove != 0 && !vk_by_number {
                        let primary = resolver.vk_to_sc(vk);
                        if primary != 0 {
                            self.update_sc(primary, flags.remove, 0);
                        }
                    }
                }
            }
            if sc != 0 || sc_by_number {
                self.update_sc(sc, flags.remove, flags.add);
            }
        }

        single_char_count
    }

    /// Apply a `key_opt` options string to `keys`, or to every key for `{All}`.
    pub fn apply_key_options(
        &mut self,
        keys: &str,
        options: &str,
        resolver: &dyn KeyResolver,
    ) -> Result<()> {
        let (remove, add) = parse_key_options(options)?;
        if keys.eq_ignore_ascii_case("{All}") {
            self.apply_all(remove, add);
        } else {
            self.apply_keys(keys, KeyFlags::options(remove, add), false, resolver);
        }
        Ok(())
    }
}

/// Parse `vkNN` / `scNNN` (hex, case-insensitive prefix).
fn parse_code(name: &str, prefix: &str) -> Option<u16> {
    if name.len() <= prefix.len() || !name.is_char_boundary(prefix.len()) {
        return None;
    }
    let (head, digits) = name.split_at(prefix.len());
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }
    let code = u16::from_str_radix(digits, 16).ok()?;
    (usize::from(code) < SC_ARRAY_COUNT).then_some(code)
}

/// Parse a `key_opt` options string into `(remove, add)` masks.
///
/// `+` and `-` switch between adding and removing for the letters that
/// follow: `E` end key, `I` ignore text, `N` notify, `V` visible, `S`
/// suppress (the opposite of `V`), `Z` reset every option bit.
pub fn parse_key_options(options: &str) -> Result<(u8, u8)> {
    let mut adding = true;
    let mut add: u8 = 0;
    let mut remove: u8 = 0;
    for c in options.chars() {
        let (flag, invert) = match c.to_ascii_uppercase() {
            '+' => {
                adding = true;
                continue;
            }
            '-' => {
                adding = false;
                continue;
            }
            ' ' | '\t' => continue,
            'Z' => {
                add = 0;
                remove = KEY_OPTION_MASK;
                continue;
            }
            'E' => (END_KEY_ENABLED, false),
            'I' => (KEY_IGNORE_TEXT, false),
            'N' => (KEY_NOTIFY, false),
            'V' => (KEY_VISIBLE, false),
            'S' => (KEY_VISIBLE, true),
            _ => return Err(KeyhookError::InvalidOption(c.to_string())),
        };
        if flag == KEY_VISIBLE {
            add |= KEY_VISIBILITY_OVERRIDE;
        }
        if adding != invert {
            add |= flag;
        } else {
            remove |= flag;
            add &= !flag;
        }
    }
    Ok((remove, add))
}

// =============================================================================
// Tests
// =============================================================================
