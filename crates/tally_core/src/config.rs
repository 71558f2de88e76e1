//!Tally filters.
//!
//!A [`SingleTallyConfig`] addresses one tally (or a wildcard range of them through broadcast
//!indices). A [`MultiTallyConfig`] is a collection of those, or an "allow all" filter restricted
//!only by screen. Both normalize the broadcast index `0xFFFF` to `None` on construction, so
//!the two spellings of a wildcard compare equal.
use std::{
    collections::HashMap,
    fmt,
    sync::{Mutex, MutexGuard, PoisonError},
};

use serde::{Deserialize, Serialize};

use crate::{
    common::{
        normalize_screen, normalize_tally_index, ScreenAddress, TallyAddress, TallyColor, TallyKey,
        TallyType, BROADCAST,
    },
    error::TallyError,
    tally::Tally,
};

fn normalize(ix: Option<u16>) -> Option<u16> {
    ix.filter(|ix| *ix != BROADCAST)
}

///What a filter is matched against.
#[derive(Debug, Clone, Copy)]
pub enum MatchTarget<'a> {
    Tally(&'a Tally),
    Key(TallyKey),
    Config(&'a SingleTallyConfig),
}

impl MatchTarget<'_> {
    pub fn key(&self) -> TallyKey {
        match self {
            MatchTarget::Tally(tally) => tally.id,
            MatchTarget::Key(key) => *key,
            MatchTarget::Config(conf) => conf.tally_key(),
        }
    }

    ///Lamps the target itself is restricted to. Tallies and keys cover every lamp.
    pub fn own_type(&self) -> TallyType {
        match self {
            MatchTarget::Config(conf) => conf.tally_type,
            _ => TallyType::ALL_TALLY,
        }
    }
}

impl ScreenAddress for MatchTarget<'_> {
    fn screen_address(&self) -> Option<u16> {
        match self {
            MatchTarget::Tally(tally) => tally.screen_address(),
            MatchTarget::Key(key) => key.screen_address(),
            MatchTarget::Config(conf) => conf.screen_address(),
        }
    }
}

impl TallyAddress for MatchTarget<'_> {
    fn tally_address(&self) -> Option<u16> {
        match self {
            MatchTarget::Tally(tally) => tally.tally_address(),
            MatchTarget::Key(key) => key.tally_address(),
            MatchTarget::Config(conf) => conf.tally_address(),
        }
    }
}

impl<'a> From<&'a Tally> for MatchTarget<'a> {
    fn from(tally: &'a Tally) -> Self {
        MatchTarget::Tally(tally)
    }
}

impl From<TallyKey> for MatchTarget<'_> {
    fn from(key: TallyKey) -> Self {
        MatchTarget::Key(key)
    }
}

impl<'a> From<&'a SingleTallyConfig> for MatchTarget<'a> {
    fn from(conf: &'a SingleTallyConfig) -> Self {
        MatchTarget::Config(conf)
    }
}

#[derive(Serialize, Deserialize)]
struct SingleTallyData {
    tally_index: u16,
    #[serde(default)]
    tally_type: TallyType,
    #[serde(default = "default_color_mask")]
    color_mask: TallyColor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    screen_index: Option<u16>,
    #[serde(default)]
    name: String,
}

fn default_color_mask() -> TallyColor {
    TallyColor::Amber
}

///Configuration for a single tally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "SingleTallyData", into = "SingleTallyData")]
pub struct SingleTallyConfig {
    tally_index: Option<u16>,
    tally_type: TallyType,
    color_mask: TallyColor,
    screen_index: Option<u16>,
    name: String,
}

impl From<SingleTallyData> for SingleTallyConfig {
    fn from(data: SingleTallyData) -> Self {
        Self {
            tally_index: normalize(Some(data.tally_index)),
            tally_type: data.tally_type,
            color_mask: data.color_mask,
            screen_index: normalize(data.screen_index),
            name: data.name,
        }
    }
}

impl From<SingleTallyConfig> for SingleTallyData {
    fn from(conf: SingleTallyConfig) -> Self {
        Self {
            tally_index: conf.tally_index.unwrap_or(BROADCAST),
            tally_type: conf.tally_type,
            color_mask: conf.color_mask,
            screen_index: conf.screen_index,
            name: conf.name,
        }
    }
}

impl SingleTallyConfig {
    pub fn new(tally_index: impl Into<Option<u16>>, tally_type: TallyType) -> Self {
        Self {
            tally_index: normalize(tally_index.into()),
            tally_type,
            color_mask: default_color_mask(),
            screen_index: None,
            name: String::new(),
        }
    }

    ///Filter for exactly `key` and `tally_type`.
    pub fn for_key(key: TallyKey, tally_type: TallyType) -> Self {
        Self::new(key.tally_index, tally_type).with_screen_index(key.screen_index)
    }

    ///Filter derived from a live tally.
    pub fn from_tally(tally: &Tally, tally_type: TallyType) -> Self {
        Self::for_key(tally.id, tally_type)
    }

    pub fn with_screen_index(mut self, screen_index: impl Into<Option<u16>>) -> Self {
        self.screen_index = normalize(screen_index.into());
        self
    }

    pub fn with_color_mask(mut self, color_mask: TallyColor) -> Self {
        self.color_mask = color_mask;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn tally_index(&self) -> Option<u16> {
        self.tally_index
    }

    pub fn tally_type(&self) -> TallyType {
        self.tally_type
    }

    pub fn color_mask(&self) -> TallyColor {
        self.color_mask
    }

    pub fn screen_index(&self) -> Option<u16> {
        self.screen_index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    ///`(screen_index, tally_index)` with broadcast values filled in.
    pub fn tally_key(&self) -> TallyKey {
        TallyKey::from_parts(self.screen_index, self.tally_index)
    }

    pub fn is_broadcast_screen(&self) -> bool {
        self.screen_index.is_none()
    }

    pub fn is_broadcast_tally(&self) -> bool {
        self.tally_index.is_none()
    }

    pub fn matches_screen<S: ScreenAddress + ?Sized>(&self, other: &S) -> bool {
        if self.is_broadcast_screen() {
            return true;
        }
        match (normalize_screen(self), normalize_screen(other)) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }

    pub fn matches<'a>(&self, other: impl Into<MatchTarget<'a>>, tally_type: TallyType) -> bool {
        self.find_match(other, tally_type).is_some()
    }

    ///Like [`SingleTallyConfig::matches`], returning the matched filter (`self`).
    pub fn find_match<'a>(
        &self,
        other: impl Into<MatchTarget<'a>>,
        tally_type: TallyType,
    ) -> Option<SingleTallyConfig> {
        self.matched(&other.into(), tally_type).then(|| self.clone())
    }

    fn matched(&self, other: &MatchTarget<'_>, tally_type: TallyType) -> bool {
        if !self.matches_screen(other) {
            return false;
        }
        if let MatchTarget::Config(conf) = other {
            if !self.tally_type.intersects(conf.tally_type) {
                return false;
            }
        }
        if !self.tally_type.intersects(tally_type) {
            return false;
        }
        match (normalize_tally_index(self), normalize_tally_index(other)) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

impl ScreenAddress for SingleTallyConfig {
    fn screen_address(&self) -> Option<u16> {
        self.screen_index
    }
}

impl TallyAddress for SingleTallyConfig {
    fn tally_address(&self) -> Option<u16> {
        self.tally_index
    }
}

impl fmt::Display for SingleTallyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.tally_key(), self.tally_type)
    }
}

///Memo key for [`MultiTallyConfig`] lookups: the target's own lamps and the requested lamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct TypeFilter {
    own: TallyType,
    requested: TallyType,
}

///Lookup cache for [`MultiTallyConfig`]. Clones start empty and it never takes part in equality.
#[derive(Default)]
struct MatchCache(Mutex<HashMap<TallyKey, HashMap<TypeFilter, SingleTallyConfig>>>);

impl MatchCache {
    fn lock(&self) -> MutexGuard<'_, HashMap<TallyKey, HashMap<TypeFilter, SingleTallyConfig>>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn get(&self, key: TallyKey, filter: TypeFilter) -> Option<SingleTallyConfig> {
        self.lock().get(&key).and_then(|types| types.get(&filter)).cloned()
    }

    fn insert(&self, key: TallyKey, filter: TypeFilter, conf: SingleTallyConfig) {
        self.lock().entry(key).or_default().insert(filter, conf);
    }

    fn invalidate(&self) {
        self.lock().clear();
    }

    fn len(&self) -> usize {
        self.lock().values().map(HashMap::len).sum()
    }
}

impl Clone for MatchCache {
    fn clone(&self) -> Self {
        Self::default()
    }
}

impl PartialEq for MatchCache {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl fmt::Debug for MatchCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MatchCache({} entries)", self.len())
    }
}

#[derive(Serialize, Deserialize)]
struct MultiTallyData {
    #[serde(default)]
    tallies: Vec<SingleTallyConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    screen_index: Option<u16>,
    #[serde(default)]
    allow_all: bool,
    #[serde(default)]
    name: String,
}

///Configuration for multiple tallies.
///
///Lookups are memoized. Every mutating method drops the whole memo table.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "MultiTallyData", into = "MultiTallyData")]
pub struct MultiTallyConfig {
    tallies: Vec<SingleTallyConfig>,
    screen_index: Option<u16>,
    allow_all: bool,
    name: String,
    cache: MatchCache,
}

impl From<MultiTallyData> for MultiTallyConfig {
    fn from(data: MultiTallyData) -> Self {
        Self {
            tallies: data.tallies,
            screen_index: normalize(data.screen_index),
            allow_all: data.allow_all,
            name: data.name,
            cache: MatchCache::default(),
        }
    }
}

impl From<MultiTallyConfig> for MultiTallyData {
    fn from(conf: MultiTallyConfig) -> Self {
        Self {
            tallies: conf.tallies,
            screen_index: conf.screen_index,
            allow_all: conf.allow_all,
            name: conf.name,
        }
    }
}

impl MultiTallyConfig {
    pub fn new(tallies: Vec<SingleTallyConfig>) -> Self {
        Self {
            tallies,
            ..Default::default()
        }
    }

    ///Matches every tally, optionally only on one screen.
    pub fn allow_all(screen_index: impl Into<Option<u16>>) -> Self {
        Self {
            allow_all: true,
            screen_index: normalize(screen_index.into()),
            ..Default::default()
        }
    }

    pub fn with_screen_index(mut self, screen_index: impl Into<Option<u16>>) -> Self {
        self.set_screen_index(screen_index);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn tallies(&self) -> &[SingleTallyConfig] {
        &self.tallies
    }

    pub fn screen_index(&self) -> Option<u16> {
        self.screen_index
    }

    pub fn is_allow_all(&self) -> bool {
        self.allow_all
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn push(&mut self, conf: SingleTallyConfig) {
        self.tallies.push(conf);
        self.cache.invalidate();
    }

    pub fn remove(&mut self, index: usize) -> Option<SingleTallyConfig> {
        if index >= self.tallies.len() {
            return None;
        }
        let removed = self.tallies.remove(index);
        self.cache.invalidate();
        Some(removed)
    }

    pub fn retain<F: FnMut(&SingleTallyConfig) -> bool>(&mut self, f: F) {
        self.tallies.retain(f);
        self.cache.invalidate();
    }

    pub fn set_tallies(&mut self, tallies: Vec<SingleTallyConfig>) {
        self.tallies = tallies;
        self.cache.invalidate();
    }

    pub fn clear(&mut self) {
        self.tallies.clear();
        self.cache.invalidate();
    }

    pub fn set_allow_all(&mut self, allow_all: bool) {
        self.allow_all = allow_all;
        self.cache.invalidate();
    }

    pub fn set_screen_index(&mut self, screen_index: impl Into<Option<u16>>) {
        self.screen_index = normalize(screen_index.into());
        self.cache.invalidate();
    }

    ///Screen filtering only applies in allow-all mode.
    pub fn is_broadcast_screen(&self) -> bool {
        !self.allow_all || self.screen_index.is_none()
    }

    pub fn matches_screen<S: ScreenAddress + ?Sized>(&self, other: &S) -> bool {
        match (normalize_screen(self), normalize_screen(other)) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }

    pub fn contains<'a>(&self, tally: impl Into<MatchTarget<'a>>, tally_type: TallyType) -> bool {
        self.find_match(tally, tally_type).is_some()
    }

    pub fn matches<'a>(&self, tally: impl Into<MatchTarget<'a>>, tally_type: TallyType) -> bool {
        self.contains(tally, tally_type)
    }

    ///The filter that matched `tally`. In allow-all mode one is synthesized from the target.
    pub fn find_match<'a>(
        &self,
        tally: impl Into<MatchTarget<'a>>,
        tally_type: TallyType,
    ) -> Option<SingleTallyConfig> {
        let target = tally.into();
        let own = target.own_type();
        if own.is_empty() || tally_type.is_empty() {
            return None;
        }
        let key = target.key();
        let filter = TypeFilter {
            own,
            requested: tally_type,
        };
        if let Some(hit) = self.cache.get(key, filter) {
            return Some(hit);
        }

        let found = if self.allow_all {
            self.matches_screen(&target).then(|| {
                SingleTallyConfig::new(normalize_tally_index(&target), tally_type)
                    .with_screen_index(normalize_screen(&target))
            })
        } else {
            self.tallies
                .iter()
                .find(|conf| conf.matched(&target, tally_type))
                .cloned()
        };

        if let Some(conf) = &found {
            self.cache.insert(key, filter, conf.clone());
        }
        found
    }

    #[cfg(test)]
    fn cached_len(&self) -> usize {
        self.cache.len()
    }
}

impl ScreenAddress for MultiTallyConfig {
    fn screen_address(&self) -> Option<u16> {
        if self.is_broadcast_screen() {
            None
        } else {
            self.screen_index
        }
    }
}

///The config of an IO object.
#[derive(Debug, Clone, PartialEq)]
pub enum TallyConfig {
    Single(SingleTallyConfig),
    Multi(MultiTallyConfig),
}

impl TallyConfig {
    pub fn single(&self) -> Result<&SingleTallyConfig, TallyError> {
        match self {
            TallyConfig::Single(conf) => Ok(conf),
            TallyConfig::Multi(_) => Err(TallyError::WrongConfigVariant { expected: "single" }),
        }
    }

    pub fn multi(&self) -> Result<&MultiTallyConfig, TallyError> {
        match self {
            TallyConfig::Multi(conf) => Ok(conf),
            TallyConfig::Single(_) => Err(TallyError::WrongConfigVariant { expected: "multi" }),
        }
    }

    ///Shortcut for the single config's tally index.
    pub fn tally_index(&self) -> Result<Option<u16>, TallyError> {
        self.single().map(SingleTallyConfig::tally_index)
    }

    ///Shortcut for the single config's tally type.
    pub fn tally_type(&self) -> Result<TallyType, TallyError> {
        self.single().map(SingleTallyConfig::tally_type)
    }

    pub fn matches_screen<S: ScreenAddress + ?Sized>(&self, other: &S) -> bool {
        match self {
            TallyConfig::Single(conf) => conf.matches_screen(other),
            TallyConfig::Multi(conf) => conf.matches_screen(other),
        }
    }

    pub fn matches<'a>(&self, other: impl Into<MatchTarget<'a>>, tally_type: TallyType) -> bool {
        self.find_match(other, tally_type).is_some()
    }

    pub fn find_match<'a>(
        &self,
        other: impl Into<MatchTarget<'a>>,
        tally_type: TallyType,
    ) -> Option<SingleTallyConfig> {
        match self {
            TallyConfig::Single(conf) => conf.find_match(other, tally_type),
            TallyConfig::Multi(conf) => conf.find_match(other, tally_type),
        }
    }
}

impl From<SingleTallyConfig> for TallyConfig {
    fn from(conf: SingleTallyConfig) -> Self {
        TallyConfig::Single(conf)
    }
}

impl From<MultiTallyConfig> for TallyConfig {
    fn from(conf: MultiTallyConfig) -> Self {
        TallyConfig::Multi(conf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    const ALL: TallyType = TallyType::ALL_TALLY;

    fn conf(screen: Option<u16>, index: u16, ttype: TallyType) -> SingleTallyConfig {
        SingleTallyConfig::new(index, ttype).with_screen_index(screen)
    }

    #[test]
    fn broadcast_screen_always_matches() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let screen: u16 = rng.gen_range(0..BROADCAST);
            let a = conf(Some(screen), rng.gen_range(0..100), TallyType::RH_TALLY);
            assert!(a.matches_screen(&BROADCAST));
            assert!(a.matches_screen(&None::<u16>));

            let b = conf(None, rng.gen_range(0..100), TallyType::RH_TALLY);
            assert!(b.matches_screen(&screen));
            assert!(b.matches_screen(&TallyKey::new(screen, 1)));
        }
    }

    #[test]
    fn wildcard_spellings_are_equal() {
        let a = conf(Some(BROADCAST), BROADCAST, ALL);
        let b = SingleTallyConfig::new(None, ALL);
        assert_eq!(a, b);
        assert!(a.is_broadcast_screen());
        assert!(a.is_broadcast_tally());
        assert_eq!(a.tally_key(), TallyKey::BROADCAST);
    }

    #[test]
    fn screen_matching_is_asymmetric() {
        let broadcast = conf(None, 5, ALL);
        let concrete = conf(Some(3), 5, ALL);
        assert!(concrete.matches_screen(&broadcast));
        assert!(broadcast.matches_screen(&concrete));

        let other_screen = conf(Some(4), 5, ALL);
        assert!(!concrete.matches_screen(&other_screen));
        assert!(!other_screen.matches_screen(&concrete));
    }

    #[test]
    fn broadcast_filter_matches_concrete_but_not_reverse_on_index() {
        let any_index = conf(Some(1), BROADCAST, ALL);
        let concrete = conf(Some(1), 5, ALL);
        assert!(any_index.matches(&concrete, ALL));
        assert!(concrete.matches(&any_index, ALL));

        let all_screens = conf(None, 5, ALL);
        let elsewhere = conf(Some(2), 6, ALL);
        assert!(!all_screens.matches(&elsewhere, ALL));
        assert!(!elsewhere.matches(&all_screens, ALL));
    }

    #[test]
    fn single_matching_grid() {
        for i in 0..10u16 {
            for j in 0..4u16 {
                let t0 = conf(Some(j), i, TallyType::RH_TALLY);
                let t1 = conf(Some(j), i + 1, TallyType::RH_TALLY);
                let t2 = conf(Some(j + 1), i, TallyType::RH_TALLY);
                let all_screens = conf(None, i, TallyType::RH_TALLY);

                assert!(t0.matches(&t0.clone(), ALL));
                assert!(!t0.matches(&t1, ALL));
                assert!(!t0.matches(&t2, ALL));
                assert!(t0.matches(&all_screens, ALL));
                assert!(!t1.matches(&all_screens, ALL));
                assert!(t2.matches(&all_screens, ALL));
                assert!(all_screens.matches(&t0, ALL));
                assert!(all_screens.matches(&t2, ALL));

                assert!(t0.matches(TallyKey::new(j, i), ALL));
                assert!(!t0.matches(TallyKey::new(j, i + 1), ALL));
                let tally = Tally::new(TallyKey::new(j, i));
                assert!(t0.matches(&tally, ALL));
                assert!(all_screens.matches(&tally, ALL));
            }
        }
    }

    #[test]
    fn single_matching_tally_types() {
        let rh = conf(Some(1), 1, TallyType::RH_TALLY);
        let txt = conf(Some(1), 1, TallyType::TXT_TALLY);
        let all = conf(Some(1), 1, ALL);
        assert!(!rh.matches(&txt, ALL));
        assert!(rh.matches(&all, ALL));
        assert!(all.matches(&txt, ALL));
        assert!(!rh.matches(&all, TallyType::TXT_TALLY));
        assert!(all.matches(&rh, TallyType::TXT_TALLY));
        assert!(!rh.matches(TallyKey::new(1, 1), TallyType::NO_TALLY));

        let none = conf(Some(1), 1, TallyType::NO_TALLY);
        assert!(!none.matches(&all, ALL));
        assert!(!all.matches(&none, ALL));
    }

    #[test]
    fn find_match_returns_filter() {
        let rh = conf(Some(1), 1, TallyType::RH_TALLY).with_name("cam 1");
        assert_eq!(rh.find_match(TallyKey::new(1, 1), ALL), Some(rh.clone()));
        assert_eq!(rh.find_match(TallyKey::new(1, 2), ALL), None);
    }

    #[test]
    fn multi_matching_grid() {
        for j in 0..4u16 {
            let tallies: Vec<_> = (0..10u16)
                .flat_map(|i| TallyType::LAMPS.map(|t| conf(Some(j), i, t)))
                .collect();
            let mconf = MultiTallyConfig::new(tallies.clone()).with_screen_index(j);
            let allow_all = MultiTallyConfig::allow_all(j);
            let allow_any_screen = MultiTallyConfig::allow_all(None);

            for single in &tallies {
                assert!(mconf.matches(single, ALL));
                assert!(allow_all.matches(single, ALL));
                assert!(allow_any_screen.matches(single, ALL));

                let next_screen =
                    conf(Some(j + 1), single.tally_index().unwrap(), single.tally_type());
                assert!(!mconf.matches(&next_screen, ALL));
                assert!(!allow_all.matches(&next_screen, ALL));
                assert!(allow_any_screen.matches(&next_screen, ALL));

                let broadcast = conf(None, single.tally_index().unwrap(), single.tally_type());
                assert!(mconf.matches(&broadcast, ALL));
                assert!(allow_all.matches(&broadcast, ALL));
            }
            assert!(!mconf.matches(TallyKey::new(j, 10), ALL));
            assert!(allow_all.matches(TallyKey::new(j, 10), ALL));
            assert!(allow_all.matches(TallyKey::new(BROADCAST, 10), ALL));
            assert!(!allow_all.matches(TallyKey::new(j + 1, 10), ALL));
            assert!(allow_all.matches_screen(&BROADCAST));
        }
    }

    #[test]
    fn allow_all_without_screen_matches_everything() {
        let mconf = MultiTallyConfig::allow_all(None);
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..500 {
            let key = TallyKey::new(rng.gen(), rng.gen());
            for ttype in TallyType::LAMPS.into_iter().chain([ALL]) {
                assert!(mconf.matches(key, ttype));
            }
            assert!(!mconf.matches(key, TallyType::NO_TALLY));
        }
    }

    #[test]
    fn allow_all_synthesizes_match() {
        let mconf = MultiTallyConfig::allow_all(2);
        let found = mconf.find_match(TallyKey::new(2, 7), TallyType::TXT_TALLY).unwrap();
        assert_eq!(found, conf(Some(2), 7, TallyType::TXT_TALLY));
        assert!(mconf.find_match(TallyKey::new(3, 7), TallyType::TXT_TALLY).is_none());
    }

    #[test]
    fn multi_screen_index_without_allow_all_does_not_filter() {
        let entry = conf(Some(5), 1, ALL);
        let unset = MultiTallyConfig::new(vec![entry.clone()]);
        let set = MultiTallyConfig::new(vec![entry]).with_screen_index(2);

        assert!(unset.is_broadcast_screen());
        assert!(set.is_broadcast_screen());
        assert!(unset.matches_screen(&9u16));
        assert!(set.matches_screen(&9u16));

        //the contained filters still decide
        assert!(unset.matches(TallyKey::new(5, 1), ALL));
        assert!(set.matches(TallyKey::new(5, 1), ALL));
        assert!(!set.matches(TallyKey::new(2, 1), ALL));
    }

    #[test]
    fn memo_is_invalidated_on_mutation() {
        let mut mconf = MultiTallyConfig::new(vec![conf(Some(1), 1, ALL)]);
        let key = TallyKey::new(1, 1);
        assert!(mconf.matches(key, ALL));
        assert_eq!(mconf.cached_len(), 1);
        assert!(mconf.matches(key, ALL));
        assert_eq!(mconf.cached_len(), 1);

        mconf.remove(0);
        assert_eq!(mconf.cached_len(), 0);
        assert!(!mconf.matches(key, ALL));

        mconf.push(conf(Some(1), 1, TallyType::LH_TALLY));
        assert!(mconf.matches(key, ALL));
        assert!(!mconf.matches(key, TallyType::RH_TALLY));

        mconf.set_tallies(vec![conf(Some(1), 2, ALL)]);
        assert!(!mconf.matches(key, ALL));

        mconf.set_allow_all(true);
        assert!(mconf.matches(key, ALL));
        mconf.set_screen_index(3);
        assert!(!mconf.matches(key, ALL));
        mconf.clear();
        assert!(mconf.tallies().is_empty());
    }

    #[test]
    fn memo_keeps_target_types_apart() {
        let mconf = MultiTallyConfig::new(vec![conf(Some(1), 1, TallyType::RH_TALLY)]);
        let rh = conf(Some(1), 1, TallyType::RH_TALLY);
        let txt = conf(Some(1), 1, TallyType::TXT_TALLY);
        assert!(mconf.matches(&rh, ALL));
        assert!(!mconf.matches(&txt, ALL));
        assert!(mconf.matches(TallyKey::new(1, 1), TallyType::RH_TALLY));
        assert!(!mconf.matches(TallyKey::new(1, 1), TallyType::TXT_TALLY));
    }

    #[test]
    fn clone_and_eq_ignore_memo() {
        let mconf = MultiTallyConfig::new(vec![conf(Some(1), 1, ALL)]);
        assert!(mconf.matches(TallyKey::new(1, 1), ALL));
        let copy = mconf.clone();
        assert_eq!(copy.cached_len(), 0);
        assert_eq!(copy, mconf);
    }

    #[test]
    fn config_variant_accessors() {
        let single: TallyConfig = conf(Some(1), 4, TallyType::RH_TALLY).into();
        let multi: TallyConfig = MultiTallyConfig::allow_all(None).into();
        assert_eq!(single.tally_index().unwrap(), Some(4));
        assert_eq!(single.tally_type().unwrap(), TallyType::RH_TALLY);
        assert!(single.multi().is_err());
        assert!(matches!(
            multi.tally_index(),
            Err(TallyError::WrongConfigVariant { expected: "single" })
        ));
        assert!(multi.matches(TallyKey::new(3, 3), ALL));
    }

    fn random_type(rng: &mut StdRng) -> TallyType {
        TallyType::from_bits(rng.gen_range(0..8)).unwrap()
    }

    fn random_index(rng: &mut StdRng) -> Option<u16> {
        match rng.gen_range(0..4) {
            0 => None,
            1 => Some(BROADCAST),
            _ => Some(rng.gen()),
        }
    }

    fn random_single(rng: &mut StdRng) -> SingleTallyConfig {
        SingleTallyConfig::new(random_index(rng), random_type(rng))
            .with_screen_index(random_index(rng))
            .with_color_mask(TallyColor::from_bits(rng.gen()))
            .with_name(format!("tally {}", rng.gen::<u32>()))
    }

    #[test]
    fn single_round_trip() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..1000 {
            let conf = random_single(&mut rng);
            let obj = serde_json::to_value(&conf).unwrap();
            let parsed: SingleTallyConfig = serde_json::from_value(obj).unwrap();
            assert_eq!(parsed, conf);
        }
        for ttype in (0..8).filter_map(TallyType::from_bits) {
            let conf = conf(Some(1), 2, ttype);
            let parsed: SingleTallyConfig =
                serde_json::from_value(serde_json::to_value(&conf).unwrap()).unwrap();
            assert_eq!(parsed.tally_type(), ttype);
        }
    }

    #[test]
    fn multi_round_trip() {
        let mut rng = StdRng::seed_from_u64(2);
        for _ in 0..1000 {
            let count = rng.gen_range(0..6);
            let singles = (0..count).map(|_| random_single(&mut rng)).collect();
            let mut mconf = MultiTallyConfig::new(singles)
                .with_screen_index(random_index(&mut rng))
                .with_name(format!("multi {}", rng.gen::<u16>()));
            mconf.set_allow_all(rng.gen());
            let obj = serde_json::to_value(&mconf).unwrap();
            let parsed: MultiTallyConfig = serde_json::from_value(obj).unwrap();
            assert_eq!(parsed, mconf);
        }
    }

    #[test]
    fn deserialize_applies_defaults() {
        let obj = serde_json::json!({"tally_index": 3});
        let parsed: SingleTallyConfig = serde_json::from_value(obj).unwrap();
        assert_eq!(parsed, SingleTallyConfig::new(3, TallyType::NO_TALLY));
        assert_eq!(parsed.color_mask(), TallyColor::Amber);

        let obj = serde_json::json!({"tally_index": 3, "tally_type": "left_tally"});
        assert!(serde_json::from_value::<SingleTallyConfig>(obj).is_err());
        assert!(serde_json::from_value::<SingleTallyConfig>(serde_json::json!({})).is_err());
    }
}
