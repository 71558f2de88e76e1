//!Live tally state published by inputs.
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use tokio::sync::broadcast;
use tracing::trace;

use crate::common::{ScreenAddress, TallyAddress, TallyColor, TallyKey, TallyType, BROADCAST};

///Highest raw brightness value a tally carries.
pub const MAX_BRIGHTNESS: u8 = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct Tally {
    pub id: TallyKey,
    pub rh_tally: TallyColor,
    pub txt_tally: TallyColor,
    pub lh_tally: TallyColor,
    pub brightness: u8,
    pub text: String,
}

impl Tally {
    pub fn new(id: TallyKey) -> Self {
        Self {
            id,
            rh_tally: TallyColor::Off,
            txt_tally: TallyColor::Off,
            lh_tally: TallyColor::Off,
            brightness: MAX_BRIGHTNESS,
            text: String::new(),
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.id.is_broadcast_tally()
    }

    ///The merged color of every lamp selected by `tally_type`.
    pub fn color(&self, tally_type: TallyType) -> TallyColor {
        tally_type
            .lamps()
            .map(|lamp| self.lamp(lamp))
            .fold(TallyColor::Off, TallyColor::merge)
    }

    fn lamp(&self, lamp: TallyType) -> TallyColor {
        match lamp {
            TallyType::RH_TALLY => self.rh_tally,
            TallyType::TXT_TALLY => self.txt_tally,
            TallyType::LH_TALLY => self.lh_tally,
            _ => TallyColor::Off,
        }
    }

    fn lamp_mut(&mut self, lamp: TallyType) -> Option<&mut TallyColor> {
        match lamp {
            TallyType::RH_TALLY => Some(&mut self.rh_tally),
            TallyType::TXT_TALLY => Some(&mut self.txt_tally),
            TallyType::LH_TALLY => Some(&mut self.lh_tally),
            _ => None,
        }
    }

    ///Set every lamp selected by `tally_type`, returning the properties that changed.
    pub fn set_color(&mut self, tally_type: TallyType, color: TallyColor) -> ChangedProps {
        let mut changed = ChangedProps::default();
        for lamp in tally_type.lamps() {
            if let Some(current) = self.lamp_mut(lamp) {
                if *current != color {
                    *current = color;
                    changed.insert(TallyProp::from_lamp(lamp));
                }
            }
        }
        changed
    }

    pub fn set_brightness(&mut self, brightness: u8) -> ChangedProps {
        let brightness = brightness.min(MAX_BRIGHTNESS);
        let mut changed = ChangedProps::default();
        if self.brightness != brightness {
            self.brightness = brightness;
            changed.insert(TallyProp::Brightness);
        }
        changed
    }

    pub fn set_text(&mut self, text: &str) -> ChangedProps {
        let mut changed = ChangedProps::default();
        if self.text != text {
            self.text = text.to_string();
            changed.insert(TallyProp::Text);
        }
        changed
    }

    ///Brightness scaled to `0.0..=1.0`.
    pub fn normalized_brightness(&self) -> f64 {
        f64::from(self.brightness.min(MAX_BRIGHTNESS)) / f64::from(MAX_BRIGHTNESS)
    }
}

impl ScreenAddress for Tally {
    fn screen_address(&self) -> Option<u16> {
        Some(self.id.screen_index)
    }
}

impl TallyAddress for Tally {
    fn tally_address(&self) -> Option<u16> {
        Some(self.id.tally_index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Screen {
    pub index: u16,
}

impl Screen {
    pub fn new(index: u16) -> Self {
        Self { index }
    }

    pub fn broadcast() -> Self {
        Self { index: BROADCAST }
    }

    pub fn is_broadcast(&self) -> bool {
        self.index == BROADCAST
    }
}

impl ScreenAddress for Screen {
    fn screen_address(&self) -> Option<u16> {
        Some(self.index)
    }
}

///A tally property that can change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TallyProp {
    RhTally,
    TxtTally,
    LhTally,
    Brightness,
    Text,
}

impl TallyProp {
    ///`lamp` must be a single lamp bit, anything else maps to the text property.
    pub fn from_lamp(lamp: TallyType) -> Self {
        match lamp {
            TallyType::RH_TALLY => TallyProp::RhTally,
            TallyType::TXT_TALLY => TallyProp::TxtTally,
            TallyType::LH_TALLY => TallyProp::LhTally,
            _ => TallyProp::Text,
        }
    }

    pub fn lamp(self) -> Option<TallyType> {
        match self {
            TallyProp::RhTally => Some(TallyType::RH_TALLY),
            TallyProp::TxtTally => Some(TallyType::TXT_TALLY),
            TallyProp::LhTally => Some(TallyType::LH_TALLY),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TallyProp::RhTally => "rh_tally",
            TallyProp::TxtTally => "txt_tally",
            TallyProp::LhTally => "lh_tally",
            TallyProp::Brightness => "brightness",
            TallyProp::Text => "text",
        }
    }
}

///The set of properties touched by a tally update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangedProps(BTreeSet<TallyProp>);

impl ChangedProps {
    ///The three lamp colors.
    pub fn colors() -> Self {
        [TallyProp::RhTally, TallyProp::TxtTally, TallyProp::LhTally]
            .into_iter()
            .collect()
    }

    pub fn all() -> Self {
        let mut props = Self::colors();
        props.insert(TallyProp::Brightness);
        props.insert(TallyProp::Text);
        props
    }

    pub fn insert(&mut self, prop: TallyProp) -> bool {
        self.0.insert(prop)
    }

    pub fn contains(&self, prop: TallyProp) -> bool {
        self.0.contains(&prop)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = TallyProp> + '_ {
        self.0.iter().copied()
    }

    ///Union of the lamps whose color is in this set.
    pub fn lamp_types(&self) -> TallyType {
        self.iter()
            .filter_map(TallyProp::lamp)
            .fold(TallyType::NO_TALLY, |acc, lamp| acc | lamp)
    }

    pub fn extend(&mut self, other: ChangedProps) {
        self.0.extend(other.0);
    }
}

impl FromIterator<TallyProp> for ChangedProps {
    fn from_iter<I: IntoIterator<Item = TallyProp>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for ChangedProps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.iter().map(TallyProp::name).collect();
        write!(f, "{{{}}}", names.join(", "))
    }
}

///Notifications published by an input.
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    ScreenAdded(Screen),
    TallyAdded(Tally),
    TallyUpdated { tally: Tally, changed: ChangedProps },
}

#[derive(Debug, Default)]
struct TableState {
    screens: BTreeMap<u16, Screen>,
    tallies: BTreeMap<TallyKey, Tally>,
}

///Screens and tallies owned by an input, with a broadcast channel announcing every change.
pub struct TallyTable {
    state: RwLock<TableState>,
    events: broadcast::Sender<InputEvent>,
}

impl TallyTable {
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            state: RwLock::new(TableState::default()),
            events,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, TableState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TableState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: InputEvent) {
        //no receivers is fine
        if self.events.send(event).is_err() {
            trace!("tally event dropped, no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InputEvent> {
        self.events.subscribe()
    }

    pub fn screen(&self, index: u16) -> Option<Screen> {
        self.read().screens.get(&index).copied()
    }

    pub fn screens(&self) -> Vec<Screen> {
        self.read().screens.values().copied().collect()
    }

    pub fn tally(&self, key: TallyKey) -> Option<Tally> {
        self.read().tallies.get(&key).cloned()
    }

    ///All tallies, or only those on `screen_index`.
    pub fn tallies(&self, screen_index: Option<u16>) -> Vec<Tally> {
        self.read()
            .tallies
            .values()
            .filter(|tally| screen_index.map_or(true, |ix| tally.id.screen_index == ix))
            .cloned()
            .collect()
    }

    ///Insert a new tally, returning `false` if one already exists under its key.
    pub fn add_tally(&self, tally: Tally) -> bool {
        let mut state = self.write();
        if state.tallies.contains_key(&tally.id) {
            return false;
        }
        let screen_ix = tally.id.screen_index;
        if !state.screens.contains_key(&screen_ix) {
            let screen = Screen::new(screen_ix);
            state.screens.insert(screen_ix, screen);
            self.emit(InputEvent::ScreenAdded(screen));
        }
        state.tallies.insert(tally.id, tally.clone());
        self.emit(InputEvent::TallyAdded(tally));
        true
    }

    ///Apply `update` to the tally under `key` and announce the properties it reports as changed.
    pub fn update_tally<F>(&self, key: TallyKey, update: F) -> Option<ChangedProps>
    where
        F: FnOnce(&mut Tally) -> ChangedProps,
    {
        let mut state = self.write();
        let tally = state.tallies.get_mut(&key)?;
        let changed = update(tally);
        if !changed.is_empty() {
            let tally = tally.clone();
            self.emit(InputEvent::TallyUpdated {
                tally,
                changed: changed.clone(),
            });
        }
        Some(changed)
    }

    pub fn clear(&self) {
        let mut state = self.write();
        state.screens.clear();
        state.tallies.clear();
    }
}

impl Default for TallyTable {
    fn default() -> Self {
        Self::new(64)
    }
}
