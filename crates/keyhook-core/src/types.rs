use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Key codes
// =============================================================================

/// Virtual-key code.
pub type Vk = u8;

/// Scan code. Extended scan codes carry `0x100`.
pub type Sc = u16;

/// Number of entries in a virtual-key indexed table.
pub const VK_ARRAY_COUNT: usize = 256;

/// Number of entries in a scan-code indexed table.
pub const SC_ARRAY_COUNT: usize = 1024;

pub const VK_BACK: Vk = 0x08;
pub const VK_TAB: Vk = 0x09;
pub const VK_RETURN: Vk = 0x0D;
pub const VK_SHIFT: Vk = 0x10;
pub const VK_CONTROL: Vk = 0x11;
pub const VK_MENU: Vk = 0x12;
pub const VK_ESCAPE: Vk = 0x1B;
pub const VK_SPACE: Vk = 0x20;
pub const VK_LWIN: Vk = 0x5B;
pub const VK_RWIN: Vk = 0x5C;
pub const VK_LSHIFT: Vk = 0xA0;
pub const VK_RSHIFT: Vk = 0xA1;
pub const VK_LCONTROL: Vk = 0xA2;
pub const VK_RCONTROL: Vk = 0xA3;
pub const VK_LMENU: Vk = 0xA4;
pub const VK_RMENU: Vk = 0xA5;

/// Highest level an artificial event can carry.
pub const MAX_SEND_LEVEL: u8 = 100;

/// Level assigned to physical keystrokes; outranks every artificial level.
pub const PHYSICAL_SEND_LEVEL: u8 = MAX_SEND_LEVEL + 1;

/// Whether `vk` is one of the Shift/Ctrl/Alt/Win keys (neutral or sided).
pub fn is_modifier_vk(vk: Vk) -> bool {
    matches!(
        vk,
        VK_SHIFT
            | VK_CONTROL
            | VK_MENU
            | VK_LWIN
            | VK_RWIN
            | VK_LSHIFT
            | VK_RSHIFT
            | VK_LCONTROL
            | VK_RCONTROL
            | VK_LMENU
            | VK_RMENU
    )
}

// =============================================================================
// Modifiers
// =============================================================================

/// Left/right-specific logical modifier state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Modifiers(pub u8);

impl Modifiers {
    pub const NONE: Modifiers = Modifiers(0);
    pub const LCONTROL: Modifiers = Modifiers(0x01);
    pub const RCONTROL: Modifiers = Modifiers(0x02);
    pub const LALT: Modifiers = Modifiers(0x04);
    pub const RALT: Modifiers = Modifiers(0x08);
    pub const LSHIFT: Modifiers = Modifiers(0x10);
    pub const RSHIFT: Modifiers = Modifiers(0x20);
    pub const LWIN: Modifiers = Modifiers(0x40);
    pub const RWIN: Modifiers = Modifiers(0x80);

    pub const CONTROL: Modifiers = Modifiers(0x01 | 0x02);
    pub const ALT: Modifiers = Modifiers(0x04 | 0x08);
    pub const SHIFT: Modifiers = Modifiers(0x10 | 0x20);
    pub const WIN: Modifiers = Modifiers(0x40 | 0x80);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: Modifiers) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Modifiers) -> bool {
        self.0 & other.0 != 0
    }

    /// Either Shift key is down.
    pub fn shift(self) -> bool {
        self.intersects(Self::SHIFT)
    }

    /// Only Shift keys (one or both) are down.
    pub fn shift_only(self) -> bool {
        self.shift() && self.0 & !Self::SHIFT.0 == 0
    }

    /// At least one Ctrl and at least one Alt key are down (AltGr included).
    pub fn ctrl_alt(self) -> bool {
        self.intersects(Self::CONTROL) && self.intersects(Self::ALT)
    }

    /// End-modifier notation, e.g. `"<^>+"` for LCtrl+RShift.
    pub fn to_mod_string(self) -> String {
        const SYMBOLS: [(Modifiers, &str); 8] = [
            (Modifiers::LCONTROL, "<^"),
            (Modifiers::RCONTROL, ">^"),
            (Modifiers::LALT, "<!"),
            (Modifiers::RALT, ">!"),
            (Modifiers::LSHIFT, "<+"),
            (Modifiers::RSHIFT, ">+"),
            (Modifiers::LWIN, "<#"),
            (Modifiers::RWIN, ">#"),
        ];
        SYMBOLS
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, symbol)| *symbol)
            .collect()
    }
}

impl std::ops::BitOr for Modifiers {
    type Output = Modifiers;

    fn bitor(self, rhs: Modifiers) -> Modifiers {
        Modifiers(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for Modifiers {
    fn bitor_assign(&mut self, rhs: Modifiers) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Modifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_mod_string())
    }
}

// =============================================================================
// Key events
// =============================================================================

/// One keystroke as delivered by the hook feed.
///
/// `text` is the character the keystroke produced under the active layout,
/// already translated by the hook. Dead keys and non-text keys carry `None`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEvent {
    pub vk: Vk,
    pub sc: Sc,
    pub modifiers: Modifiers,
    pub text: Option<char>,
    /// Input level of the event. Physical input uses [`PHYSICAL_SEND_LEVEL`].
    pub send_level: u8,
}

impl KeyEvent {
    pub fn new(vk: Vk, sc: Sc) -> Self {
        Self {
            vk,
            sc,
            modifiers: Modifiers::NONE,
            text: None,
            send_level: PHYSICAL_SEND_LEVEL,
        }
    }

    pub fn with_text(mut self, ch: char) -> Self {
        self.text = Some(ch);
        self
    }

    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    pub fn with_send_level(mut self, level: u8) -> Self {
        self.send_level = level;
        self
    }

    pub fn is_extended(&self) -> bool {
        self.sc & 0x100 != 0
    }
}

// =============================================================================
// Identifiers
// =============================================================================

/// Stable handle of a capture session inside the runtime arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Unix timestamp in seconds since epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now().timestamp())
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp())
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.0, 0).unwrap_or_default()
    }
}

// =============================================================================
// Tests
// =============================================================================
