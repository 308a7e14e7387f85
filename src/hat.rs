use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::{HatchError, HatchResult};
use crate::project::BlockRecord;
use crate::target::Target;

const SPECIAL_KEYS: [(&str, u32); 6] = [
    ("space", 0x20),
    ("up arrow", 0x111),
    ("down arrow", 0x112),
    ("right arrow", 0x113),
    ("left arrow", 0x114),
    ("any", 0xFFFF),
];
const LETTERS: &str = "abcdefghijklmnopqrstuvwxyz";
const DIGITS: &str = "0123456789";
const LETTER_BASE: usize = SPECIAL_KEYS.len();
const DIGIT_BASE: usize = LETTER_BASE + 26;

/// Position in the fixed key table: specials, then `a`-`z`, then `0`-`9`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct KeyIndex(usize);

impl KeyIndex {
    pub const ANY: KeyIndex = KeyIndex(5);

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        if let Some(pos) = SPECIAL_KEYS.iter().position(|(n, _)| *n == name) {
            return Some(Self(pos));
        }
        let mut chars = name.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Self::from_char(c),
            _ => None,
        }
    }

    /// Maps a host key code (ASCII for letters and digits) into the table.
    pub fn from_code(code: u32) -> Option<Self> {
        if let Some(pos) = SPECIAL_KEYS.iter().position(|(_, c)| *c == code) {
            return Some(Self(pos));
        }
        char::from_u32(code).and_then(|c| Self::from_char(c.to_ascii_lowercase()))
    }

    fn from_char(c: char) -> Option<Self> {
        if let Some(pos) = LETTERS.find(c) {
            return Some(Self(LETTER_BASE + pos));
        }
        DIGITS.find(c).map(|pos| Self(DIGIT_BASE + pos))
    }

    /// Host key code for this entry; inverse of [`KeyIndex::from_code`].
    pub fn code(self) -> u32 {
        match self.0 {
            i if i < LETTER_BASE => SPECIAL_KEYS[i].1,
            i if i < DIGIT_BASE => u32::from(LETTERS.as_bytes()[i - LETTER_BASE]),
            i => u32::from(DIGITS.as_bytes()[i - DIGIT_BASE]),
        }
    }

    pub fn is_any(self) -> bool {
        self == Self::ANY
    }

    pub fn name(self) -> String {
        match self.0 {
            i if i < LETTER_BASE => SPECIAL_KEYS[i].0.to_string(),
            i if i < DIGIT_BASE => LETTERS[i - LETTER_BASE..=i - LETTER_BASE].to_string(),
            i => DIGITS[i - DIGIT_BASE..=i - DIGIT_BASE].to_string(),
        }
    }
}

/// Runtime data accompanying a fired hat.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EventPayload {
    /// A pointer position in stage coordinates.
    Point { x: f64, y: f64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HatKind {
    ProgramStart,
    KeyPressed,
    EntityClicked,
    MessageReceived,
    BackdropSwitched,
}

/// Describes a class of triggering events.
///
/// Equality is a matching relation rather than an equivalence: `KeyPressed(ANY)`
/// equals every `KeyPressed`, so it is not transitive and `Hat` does not
/// implement `Eq`. The hash covers the kind only, which keeps it consistent
/// with that relation; the registry buckets by [`HatKind`] and scans.
#[derive(Clone, Debug)]
pub enum Hat {
    ProgramStart,
    KeyPressed(KeyIndex),
    EntityClicked,
    MessageReceived(String),
    BackdropSwitched(String),
}

impl PartialEq for Hat {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::ProgramStart, Self::ProgramStart) => true,
            (Self::EntityClicked, Self::EntityClicked) => true,
            (Self::KeyPressed(a), Self::KeyPressed(b)) => a.is_any() || b.is_any() || a == b,
            (Self::MessageReceived(a), Self::MessageReceived(b)) => a == b,
            (Self::BackdropSwitched(a), Self::BackdropSwitched(b)) => a == b,
            _ => false,
        }
    }
}

impl Hash for Hat {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind().hash(state);
    }
}

impl Hat {
    pub fn key_pressed(name: &str) -> Option<Self> {
        KeyIndex::from_name(name).map(Self::KeyPressed)
    }

    pub fn kind(&self) -> HatKind {
        match self {
            Self::ProgramStart => HatKind::ProgramStart,
            Self::KeyPressed(_) => HatKind::KeyPressed,
            Self::EntityClicked => HatKind::EntityClicked,
            Self::MessageReceived(_) => HatKind::MessageReceived,
            Self::BackdropSwitched(_) => HatKind::BackdropSwitched,
        }
    }

    /// Runtime activation predicate evaluated against the candidate target.
    pub fn condition(&self, payload: Option<&EventPayload>, target: &Target) -> bool {
        match self {
            Self::EntityClicked => match payload {
                Some(EventPayload::Point { x, y }) => target.touches_point(*x, *y),
                None => false,
            },
            _ => true,
        }
    }

    /// Derives the hat for a top-level event block; `Ok(None)` for event
    /// opcodes that carry no supported trigger.
    pub fn from_event_block(id: &str, block: &BlockRecord) -> HatchResult<Option<Self>> {
        let field = |name: &str| {
            block.field_text(name).ok_or_else(|| {
                HatchError::invalid_block(id, format!("{} is missing field {name}", block.opcode))
            })
        };
        let hat = match block.opcode.as_str() {
            "event_whenflagclicked" => Self::ProgramStart,
            "event_whenkeypressed" => {
                let key = field("KEY_OPTION")?;
                Self::key_pressed(&key)
                    .ok_or_else(|| HatchError::invalid_block(id, format!("unknown key '{key}'")))?
            }
            "event_whenthisspriteclicked" | "event_whenstageclicked" => Self::EntityClicked,
            "event_whenbroadcastreceived" => Self::MessageReceived(field("BROADCAST_OPTION")?),
            "event_whenbackdropswitchesto" => Self::BackdropSwitched(field("BACKDROP")?),
            _ => return Ok(None),
        };
        Ok(Some(hat))
    }
}

impl fmt::Display for Hat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProgramStart => f.write_str("program start"),
            Self::KeyPressed(key) => write!(f, "key '{}' pressed", key.name()),
            Self::EntityClicked => f.write_str("clicked"),
            Self::MessageReceived(msg) => write!(f, "message '{msg}'"),
            Self::BackdropSwitched(name) => write!(f, "backdrop '{name}'"),
        }
    }
}
