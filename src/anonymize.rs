//! Deterministic pseudo-identities for feed authors.
//!
//! A user id is hashed into a stable name, avatar and card color drawn from a
//! fixed [`Palette`]. Reordering or editing a palette changes every identity
//! derived from it, so palettes carry a version number.

/// Palette entries are indexed by position; bump `version` on any edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub version: u32,
    pub names: &'static [&'static str],
    pub avatars: &'static [&'static str],
    pub colors: &'static [&'static str],
}

pub const CHRISTMAS_NAMES: [&str; 50] = [
    "Jingle Bell",
    "Holly Berry",
    "Candy Cane",
    "Snow Flake",
    "Winter Star",
    "Frost Bite",
    "Pine Needle",
    "Sugar Plum",
    "Ginger Bread",
    "Icicle Drop",
    "Mistletoe",
    "Nutcracker",
    "Tinsel Shine",
    "Cocoa Bean",
    "Peppermint",
    "Sleigh Bell",
    "Reindeer",
    "Snowball",
    "Eggnog",
    "Christmas Tree",
    "Angel Wing",
    "Star Light",
    "Gift Wrap",
    "Ribbon Bow",
    "Ornament",
    "Candy Mint",
    "Hot Cocoa",
    "Fire Place",
    "Wreath Maker",
    "Cookie Baker",
    "Snow Angel",
    "Ice Crystal",
    "Winter Moon",
    "Frost King",
    "Snow Queen",
    "Jingle Jangle",
    "Merry Maker",
    "Joy Bringer",
    "Hope Bearer",
    "Peace Keeper",
    "Love Giver",
    "Kind Heart",
    "Gentle Soul",
    "Warm Hug",
    "Sweet Smile",
    "Bright Light",
    "Happy Helper",
    "Cheerful Elf",
    "Magic Maker",
    "Wonder Worker",
];

pub const CHRISTMAS_AVATARS: [&str; 30] = [
    "🎅", "🤶", "🎄", "⭐", "❄️", "🎁", "🔔", "🕯️", "🍪", "🥛", "🦌", "⛄", "🎊", "🎉", "✨", "🌟",
    "🎀", "🧑‍🎄", "🎯", "🎪", "🍭", "🧤", "🧣", "👑", "💎", "🎭", "🎨", "🎵", "🎶", "💫",
];

pub const CHRISTMAS_COLORS: [&str; 16] = [
    "bg-red-200",
    "bg-green-200",
    "bg-red-300",
    "bg-green-300",
    "bg-emerald-200",
    "bg-rose-200",
    "bg-lime-200",
    "bg-pink-200",
    "bg-teal-200",
    "bg-amber-200",
    "bg-orange-200",
    "bg-yellow-200",
    "bg-indigo-200",
    "bg-purple-200",
    "bg-cyan-200",
    "bg-slate-200",
];

pub const CHRISTMAS: Palette = Palette {
    version: 1,
    names: &CHRISTMAS_NAMES,
    avatars: &CHRISTMAS_AVATARS,
    colors: &CHRISTMAS_COLORS,
};

impl Palette {
    pub fn validate(&self) -> Result<(), EmptyPalette> {
        let checks = [
            ("names", self.names.is_empty()),
            ("avatars", self.avatars.is_empty()),
            ("colors", self.colors.is_empty()),
        ];
        match checks.into_iter().find(|(_, empty)| *empty) {
            Some((field, _)) => Err(EmptyPalette {
                version: self.version,
                field,
            }),
            None => Ok(()),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("palette v{version}: {field} must not be empty")]
pub struct EmptyPalette {
    pub version: u32,
    pub field: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: &'static str,
    pub avatar: &'static str,
    pub color_class: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct Anonymizer {
    palette: Palette,
}

impl Default for Anonymizer {
    fn default() -> Self {
        Self { palette: CHRISTMAS }
    }
}

impl Anonymizer {
    pub fn new(palette: Palette) -> Result<Self, EmptyPalette> {
        palette.validate()?;
        Ok(Self { palette })
    }

    pub fn anonymize(&self, user_id: &str) -> Identity {
        // palette validated in `new`
        let indices = Indices::compute(user_id, &self.palette);
        Identity {
            name: self.palette.names[indices.name],
            avatar: self.palette.avatars[indices.avatar],
            color_class: self.palette.colors[indices.color],
        }
    }
}

/// Positions into each palette slice. Each index reads a different bit window
/// of the same hash so the three attributes vary independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Indices {
    pub name: usize,
    pub avatar: usize,
    pub color: usize,
}

impl Indices {
    pub fn for_user(user_id: &str, palette: &Palette) -> Result<Self, EmptyPalette> {
        palette.validate()?;
        Ok(Self::compute(user_id, palette))
    }

    fn compute(user_id: &str, palette: &Palette) -> Self {
        let hash = hash_user_id(user_id);
        Self {
            name: window(hash, 0, palette.names.len()),
            avatar: window(hash, 8, palette.avatars.len()),
            color: window(hash, 16, palette.colors.len()),
        }
    }
}

/// `hash * 31 + unit` over UTF-16 code units, wrapped to i32.
pub fn hash_user_id(user_id: &str) -> i32 {
    user_id
        .encode_utf16()
        .fold(0i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(i32::from(unit)))
}

fn window(hash: i32, shift: u32, len: usize) -> usize {
    // arithmetic shift; unsigned_abs keeps |i32::MIN| representable
    (hash >> shift).unsigned_abs() as usize % len
}
