//!Value types used to address tallies: keys, lamp types and colors.
//!
//!A screen or tally index of `0xFFFF` is the broadcast address. A missing index (`None`) is treated
//!the same way everywhere, and the `normalize_*` functions collapse both into `None`.
use std::{
    fmt,
    ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign},
    str::FromStr,
};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::OptionError;

///The broadcast screen/tally index.
pub const BROADCAST: u16 = 0xFFFF;

///Identifies a single tally by `(screen_index, tally_index)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TallyKey {
    pub screen_index: u16,
    pub tally_index: u16,
}

impl TallyKey {
    pub const BROADCAST: TallyKey = TallyKey::new(BROADCAST, BROADCAST);

    pub const fn new(screen_index: u16, tally_index: u16) -> Self {
        Self {
            screen_index,
            tally_index,
        }
    }

    ///Build a key from optional indices, substituting the broadcast value for `None`.
    pub fn from_parts(screen_index: Option<u16>, tally_index: Option<u16>) -> Self {
        Self::new(
            screen_index.unwrap_or(BROADCAST),
            tally_index.unwrap_or(BROADCAST),
        )
    }

    pub fn is_broadcast_screen(&self) -> bool {
        self.screen_index == BROADCAST
    }

    pub fn is_broadcast_tally(&self) -> bool {
        self.tally_index == BROADCAST
    }
}

impl From<(u16, u16)> for TallyKey {
    fn from((screen_index, tally_index): (u16, u16)) -> Self {
        Self::new(screen_index, tally_index)
    }
}

impl fmt::Display for TallyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.screen_index, self.tally_index)
    }
}

///Bitmask over the right-hand, text and left-hand tally lamps.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TallyType(u8);

impl TallyType {
    pub const NO_TALLY: TallyType = TallyType(0);
    pub const RH_TALLY: TallyType = TallyType(1);
    pub const TXT_TALLY: TallyType = TallyType(2);
    pub const LH_TALLY: TallyType = TallyType(4);
    pub const ALL_TALLY: TallyType = TallyType(7);

    ///The individual lamps, in display order.
    pub const LAMPS: [TallyType; 3] = [Self::RH_TALLY, Self::TXT_TALLY, Self::LH_TALLY];

    ///Every named member.
    pub const NAMED: [TallyType; 5] = [
        Self::NO_TALLY,
        Self::RH_TALLY,
        Self::TXT_TALLY,
        Self::LH_TALLY,
        Self::ALL_TALLY,
    ];

    ///Returns `None` if `bits` has bits outside of [`TallyType::ALL_TALLY`].
    pub const fn from_bits(bits: u8) -> Option<Self> {
        if bits & !Self::ALL_TALLY.0 == 0 {
            Some(Self(bits))
        } else {
            None
        }
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn intersects(self, other: TallyType) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn contains(self, other: TallyType) -> bool {
        self.0 & other.0 == other.0
    }

    ///Iterate the single lamps set in this mask.
    pub fn lamps(self) -> impl Iterator<Item = TallyType> {
        Self::LAMPS.into_iter().filter(move |lamp| self.contains(*lamp))
    }

    fn member_name(self) -> Option<&'static str> {
        match self.0 {
            0 => Some("no_tally"),
            1 => Some("rh_tally"),
            2 => Some("txt_tally"),
            4 => Some("lh_tally"),
            7 => Some("all_tally"),
            _ => None,
        }
    }

    ///The member name, or the lamp names joined by `|` for unnamed combinations.
    pub fn name(self) -> String {
        match self.member_name() {
            Some(name) => name.to_string(),
            None => self
                .lamps()
                .filter_map(TallyType::member_name)
                .collect::<Vec<_>>()
                .join("|"),
        }
    }
}

impl FromStr for TallyType {
    type Err = OptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut result = TallyType::NO_TALLY;
        for part in s.split('|').map(str::trim) {
            let member = TallyType::NAMED
                .into_iter()
                .find(|t| t.member_name() == Some(part))
                .ok_or_else(|| OptionError::Choice {
                    name: "tally_type",
                    value: s.to_string(),
                    choices: TallyType::NAMED.iter().map(|t| t.name()).collect(),
                })?;
            result |= member;
        }
        Ok(result)
    }
}

impl fmt::Debug for TallyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TallyType({})", self.name())
    }
}

impl fmt::Display for TallyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl BitAnd for TallyType {
    type Output = TallyType;
    fn bitand(self, rhs: Self) -> Self::Output {
        TallyType(self.0 & rhs.0)
    }
}

impl BitOr for TallyType {
    type Output = TallyType;
    fn bitor(self, rhs: Self) -> Self::Output {
        TallyType(self.0 | rhs.0)
    }
}

impl BitAndAssign for TallyType {
    fn bitand_assign(&mut self, rhs: Self) {
        self.0 &= rhs.0;
    }
}

impl BitOrAssign for TallyType {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl Serialize for TallyType {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&self.name())
    }
}

impl<'de> Deserialize<'de> for TallyType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(de::Error::custom)
    }
}

///A tally lamp color. Amber is red and green lit together, so merging colors is a bitwise OR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum TallyColor {
    #[default]
    Off = 0,
    Red = 1,
    Green = 2,
    Amber = 3,
}

impl TallyColor {
    pub const ALL: [TallyColor; 4] = [
        TallyColor::Off,
        TallyColor::Red,
        TallyColor::Green,
        TallyColor::Amber,
    ];

    ///Only the two low bits are used.
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => TallyColor::Off,
            1 => TallyColor::Red,
            2 => TallyColor::Green,
            _ => TallyColor::Amber,
        }
    }

    pub const fn bits(self) -> u8 {
        self as u8
    }

    pub const fn is_on(self) -> bool {
        !matches!(self, TallyColor::Off)
    }

    pub const fn merge(self, other: TallyColor) -> TallyColor {
        TallyColor::from_bits(self.bits() | other.bits())
    }

    pub const fn name(self) -> &'static str {
        match self {
            TallyColor::Off => "OFF",
            TallyColor::Red => "RED",
            TallyColor::Green => "GREEN",
            TallyColor::Amber => "AMBER",
        }
    }
}

impl FromStr for TallyColor {
    type Err = OptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TallyColor::ALL
            .into_iter()
            .find(|color| color.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| OptionError::Choice {
                name: "color",
                value: s.to_string(),
                choices: TallyColor::ALL.iter().map(|c| c.name().to_string()).collect(),
            })
    }
}

impl fmt::Display for TallyColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl BitOr for TallyColor {
    type Output = TallyColor;
    fn bitor(self, rhs: Self) -> Self::Output {
        self.merge(rhs)
    }
}

impl BitAnd for TallyColor {
    type Output = TallyColor;
    fn bitand(self, rhs: Self) -> Self::Output {
        TallyColor::from_bits(self.bits() & rhs.bits())
    }
}

impl BitOrAssign for TallyColor {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.merge(rhs);
    }
}

impl Serialize for TallyColor {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for TallyColor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(de::Error::custom)
    }
}

///Anything that can be resolved to a screen index.
pub trait ScreenAddress {
    ///The raw screen index, `None` when unset.
    fn screen_address(&self) -> Option<u16>;
}

///Anything that can be resolved to a tally index.
pub trait TallyAddress {
    ///The raw tally index, `None` when unset.
    fn tally_address(&self) -> Option<u16>;
}

///Resolve a screen index, mapping broadcast and unset values to `None`.
pub fn normalize_screen<T: ScreenAddress + ?Sized>(obj: &T) -> Option<u16> {
    obj.screen_address().filter(|ix| *ix != BROADCAST)
}

///Resolve a tally index, mapping broadcast and unset values to `None`.
pub fn normalize_tally_index<T: TallyAddress + ?Sized>(obj: &T) -> Option<u16> {
    obj.tally_address().filter(|ix| *ix != BROADCAST)
}

impl ScreenAddress for u16 {
    fn screen_address(&self) -> Option<u16> {
        Some(*self)
    }
}

impl TallyAddress for u16 {
    fn tally_address(&self) -> Option<u16> {
        Some(*self)
    }
}

impl ScreenAddress for Option<u16> {
    fn screen_address(&self) -> Option<u16> {
        *self
    }
}

impl TallyAddress for Option<u16> {
    fn tally_address(&self) -> Option<u16> {
        *self
    }
}

impl ScreenAddress for TallyKey {
    fn screen_address(&self) -> Option<u16> {
        Some(self.screen_index)
    }
}

impl TallyAddress for TallyKey {
    fn tally_address(&self) -> Option<u16> {
        Some(self.tally_index)
    }
}
