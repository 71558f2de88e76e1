//!Wiring between inputs and outputs.
//!
//!Each [`Output`] owns an [`OutputBindings`] registry holding the inputs it is bound to and, per
//!tally key, the ids of the inputs that provide that tally. Both maps sit behind one mutex so a
//!bind is never half recorded. Inputs are held weakly. Their owner (a container) decides when
//!they go away.
//!
//!Binding to an input subscribes to its event stream before the current tallies are enumerated,
//!so a tally added during the bind is seen either in the enumeration or as an event. Seeing it in
//!both is harmless: binding a tally is idempotent.
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
    baseio::{Input, Output},
    common::{TallyColor, TallyKey, TallyType},
    config::{MatchTarget, SingleTallyConfig},
    error::TallyError,
    tally::{ChangedProps, InputEvent, Tally},
};

///A tally, or just its key, to compute a merged color for.
#[derive(Debug, Clone, Copy)]
pub enum TallyRef<'a> {
    Tally(&'a Tally),
    Key(TallyKey),
}

impl TallyRef<'_> {
    pub fn key(&self) -> TallyKey {
        match self {
            TallyRef::Tally(tally) => tally.id,
            TallyRef::Key(key) => *key,
        }
    }
}

impl<'a> From<&'a Tally> for TallyRef<'a> {
    fn from(tally: &'a Tally) -> Self {
        TallyRef::Tally(tally)
    }
}

impl From<TallyKey> for TallyRef<'_> {
    fn from(key: TallyKey) -> Self {
        TallyRef::Key(key)
    }
}

struct BoundInput {
    input: Weak<dyn Input>,
    listener: CancellationToken,
}

#[derive(Default)]
struct BindingState {
    bound_inputs: BTreeMap<String, BoundInput>,
    bound_input_tally_keys: HashMap<TallyKey, BTreeSet<String>>,
}

impl BindingState {
    ///Drops `input_id` and returns it with the tally keys it was providing.
    fn forget_input(&mut self, input_id: &str) -> Option<(BoundInput, Vec<TallyKey>)> {
        let bound = self.bound_inputs.remove(input_id)?;
        let mut dropped = Vec::new();
        self.bound_input_tally_keys.retain(|key, ids| {
            if ids.remove(input_id) {
                dropped.push(*key);
            }
            !ids.is_empty()
        });
        Some((bound, dropped))
    }
}

///The binding registry of one output.
#[derive(Default)]
pub struct OutputBindings {
    state: Mutex<BindingState>,
}

impl Drop for OutputBindings {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for bound in state.bound_inputs.values() {
            bound.listener.cancel();
        }
    }
}

impl OutputBindings {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BindingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_bound(&self, input_id: &str) -> bool {
        self.lock().bound_inputs.contains_key(input_id)
    }

    ///Ids of every bound input, sorted.
    pub fn bound_input_ids(&self) -> Vec<String> {
        self.lock().bound_inputs.keys().cloned().collect()
    }

    ///Ids of the bound inputs providing `key`.
    pub fn inputs_for_tally(&self, key: TallyKey) -> BTreeSet<String> {
        self.lock()
            .bound_input_tally_keys
            .get(&key)
            .cloned()
            .unwrap_or_default()
    }

    ///Every tracked tally key with the ids providing it.
    pub fn bound_tally_keys(&self) -> BTreeMap<TallyKey, BTreeSet<String>> {
        self.lock()
            .bound_input_tally_keys
            .iter()
            .map(|(key, ids)| (*key, ids.clone()))
            .collect()
    }

    pub fn is_tally_bound(&self, input_id: &str, key: TallyKey) -> bool {
        self.lock()
            .bound_input_tally_keys
            .get(&key)
            .is_some_and(|ids| ids.contains(input_id))
    }

    ///Record `input_id` as providing `key`. Returns `false` if the input is not bound.
    fn track_tally(&self, input_id: &str, key: TallyKey) -> bool {
        let mut state = self.lock();
        if !state.bound_inputs.contains_key(input_id) {
            return false;
        }
        state
            .bound_input_tally_keys
            .entry(key)
            .or_default()
            .insert(input_id.to_string());
        true
    }

    ///Live bound inputs providing `key`.
    fn providers(&self, key: TallyKey) -> Vec<Arc<dyn Input>> {
        let state = self.lock();
        state
            .bound_input_tally_keys
            .get(&key)
            .into_iter()
            .flatten()
            .filter_map(|id| state.bound_inputs.get(id))
            .filter_map(|bound| bound.input.upgrade())
            .collect()
    }

    ///Merged color for a tally across every bound input providing it.
    pub fn merged_color(&self, tally: TallyRef<'_>, tally_type: TallyType) -> TallyColor {
        let key = tally.key();
        let start = match tally {
            TallyRef::Tally(tally) => tally.color(tally_type),
            TallyRef::Key(_) => TallyColor::Off,
        };
        let conf = SingleTallyConfig::for_key(key, tally_type);
        self.providers(key)
            .iter()
            .filter_map(|input| input.get_tally_color(&conf))
            .fold(start, TallyColor::merge)
    }

    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        let state = self.lock();
        for ids in state.bound_input_tally_keys.values() {
            assert!(!ids.is_empty());
            for id in ids {
                assert!(state.bound_inputs.contains_key(id), "{id} tracked but not bound");
            }
        }
    }
}

fn input_id(input: &Arc<dyn Input>) -> Result<String, TallyError> {
    input
        .id()
        .map(str::to_string)
        .ok_or(TallyError::MissingId {
            namespace: input.namespace(),
        })
}

///Tallies of `input` that `output` covers, deduplicated by key.
fn matching_tallies(output: &dyn Output, input: &dyn Input) -> Vec<Tally> {
    let mut found = BTreeMap::new();
    for screen in input.get_all_screens() {
        if !output.screen_matches(&screen) {
            continue;
        }
        let filter = (!screen.is_broadcast()).then_some(screen.index);
        for tally in input.get_all_tallies(filter) {
            if output.tally_matches(MatchTarget::Tally(&tally), TallyType::ALL_TALLY) {
                found.entry(tally.id).or_insert(tally);
            }
        }
    }
    found.into_values().collect()
}

///Bind `output` to `input` and to every matching tally it has now or adds later.
///
///Binding an already bound input does nothing.
pub async fn bind_to_input(
    output: &Arc<dyn Output>,
    input: &Arc<dyn Input>,
) -> Result<(), TallyError> {
    let id = input_id(input)?;
    let initial = {
        let mut state = output.bindings().lock();
        if state.bound_inputs.contains_key(&id) {
            trace!(output = output.id(), input = %id, "already bound");
            return Ok(());
        }
        let events = input.subscribe();
        let tallies = matching_tallies(output.as_ref(), input.as_ref());
        let listener = CancellationToken::new();
        state.bound_inputs.insert(
            id.clone(),
            BoundInput {
                input: Arc::downgrade(input),
                listener: listener.clone(),
            },
        );
        for tally in &tallies {
            state
                .bound_input_tally_keys
                .entry(tally.id)
                .or_default()
                .insert(id.clone());
        }
        spawn_listener(
            Arc::downgrade(output),
            Arc::downgrade(input),
            id.clone(),
            events,
            listener,
        );
        tallies
    };
    debug!(
        output = output.id(),
        input = %id,
        tallies = initial.len(),
        "bound to input"
    );
    for tally in initial {
        output
            .on_receiver_tally_change(input, &tally, &ChangedProps::all())
            .await?;
    }
    Ok(())
}

///Remove every trace of `input` from `output`. Returns `false` if it was not bound.
///
///Tallies the input was providing are pushed to the output again, merged from what remains.
pub async fn unbind_from_input(output: &Arc<dyn Output>, input: &Arc<dyn Input>) -> bool {
    match input.id() {
        Some(id) => unbind_input_id(output, id).await,
        None => false,
    }
}

///Like [`unbind_from_input`] for an input that may already be gone.
pub async fn unbind_input_id(output: &Arc<dyn Output>, input_id: &str) -> bool {
    let Some((removed, keys)) = forget(output.as_ref(), input_id) else {
        return false;
    };
    let removed = removed.upgrade();
    for key in keys {
        if let Err(err) = refresh_tally(output, key, removed.as_ref()).await {
            warn!(output = output.id(), tally = %key, "failed to refresh tally: {err}");
        }
    }
    true
}

fn forget(output: &dyn Output, input_id: &str) -> Option<(Weak<dyn Input>, Vec<TallyKey>)> {
    let (bound, keys) = output.bindings().lock().forget_input(input_id)?;
    bound.listener.cancel();
    debug!(output = output.id(), input = %input_id, "unbound from input");
    Some((bound.input, keys))
}

//pushes `key` after an input stopped providing it, seeded with a blank tally
async fn refresh_tally(
    output: &Arc<dyn Output>,
    key: TallyKey,
    removed: Option<&Arc<dyn Input>>,
) -> Result<(), TallyError> {
    let mut tally = Tally::new(key);
    let remaining = output.bindings().providers(key);
    let source = match remaining.first() {
        Some(input) => {
            if let Some(current) = input.get_tally(key) {
                tally.brightness = current.brightness;
            }
            input
        }
        None => match removed {
            Some(input) => input,
            None => {
                trace!(tally = %key, "no input left to refresh from");
                return Ok(());
            }
        },
    };
    output
        .on_receiver_tally_change(source, &tally, &ChangedProps::all())
        .await
}

///Unbind `output` from every input without pushing anything to it.
pub fn unbind_all(output: &dyn Output) {
    for id in output.bindings().bound_input_ids() {
        forget(output, &id);
    }
}

///Track `tally` of `input` on `output` and push its current state.
pub async fn bind_to_tally(
    output: &Arc<dyn Output>,
    input: &Arc<dyn Input>,
    tally: &Tally,
) -> Result<(), TallyError> {
    let id = input_id(input)?;
    if !output.bindings().track_tally(&id, tally.id) {
        trace!(input = %id, tally = %tally.id, "input not bound, skipping tally");
        return Ok(());
    }
    output
        .on_receiver_tally_change(input, tally, &ChangedProps::all())
        .await
}

async fn handle_event(
    output: &Arc<dyn Output>,
    input: &Arc<dyn Input>,
    input_id: &str,
    event: InputEvent,
) -> Result<(), TallyError> {
    match event {
        InputEvent::ScreenAdded(screen) => {
            trace!(input = %input_id, screen = screen.index, "screen added");
            Ok(())
        }
        InputEvent::TallyAdded(tally) => {
            if output.tally_matches(MatchTarget::Tally(&tally), TallyType::ALL_TALLY) {
                bind_to_tally(output, input, &tally).await
            } else {
                Ok(())
            }
        }
        InputEvent::TallyUpdated { tally, changed } => {
            if output.bindings().is_tally_bound(input_id, tally.id) {
                output.on_receiver_tally_change(input, &tally, &changed).await
            } else {
                Ok(())
            }
        }
    }
}

//rebinds every matching tally, for when events were missed
async fn resync(output: &Arc<dyn Output>, input: &Arc<dyn Input>) -> Result<(), TallyError> {
    for tally in matching_tallies(output.as_ref(), input.as_ref()) {
        bind_to_tally(output, input, &tally).await?;
    }
    Ok(())
}

fn spawn_listener(
    output: Weak<dyn Output>,
    input: Weak<dyn Input>,
    input_id: String,
    mut events: broadcast::Receiver<InputEvent>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(event) => {
                    let (Some(output), Some(input)) = (output.upgrade(), input.upgrade()) else {
                        break;
                    };
                    if let Err(err) = handle_event(&output, &input, &input_id, event).await {
                        warn!(input = %input_id, "error handling tally event: {err}");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        input = %input_id,
                        "binding listener skipped {skipped} events, resyncing"
                    );
                    let (Some(output), Some(input)) = (output.upgrade(), input.upgrade()) else {
                        break;
                    };
                    if let Err(err) = resync(&output, &input).await {
                        warn!(input = %input_id, "error resyncing tallies: {err}");
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!(input = %input_id, "binding listener shutting down");
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        baseio::BaseIo,
        config::MultiTallyConfig,
        test_utils::{settle, RecordingOutput, TableInput},
    };
    use pretty_assertions::assert_eq;

    const KEY: TallyKey = TallyKey::new(1, 1);

    fn masked_input(id: &str, color_mask: TallyColor) -> Arc<TableInput> {
        let conf = SingleTallyConfig::for_key(KEY, TallyType::RH_TALLY).with_color_mask(color_mask);
        let input = Arc::new(TableInput::new(conf));
        input.core().assign_id(id).unwrap();
        input
    }

    fn rh_output() -> Arc<RecordingOutput> {
        let output = RecordingOutput::new(SingleTallyConfig::for_key(KEY, TallyType::RH_TALLY));
        output.core().assign_id("output:000").unwrap();
        Arc::new(output)
    }

    #[tokio::test]
    async fn merge_red_and_green_is_amber() {
        let red = masked_input("red:000", TallyColor::Red);
        let green = masked_input("green:000", TallyColor::Green);
        let output = rh_output();
        let out: Arc<dyn Output> = output.clone();
        let (red_dyn, green_dyn): (Arc<dyn Input>, Arc<dyn Input>) = (red.clone(), green.clone());

        bind_to_input(&out, &red_dyn).await.unwrap();
        bind_to_input(&out, &green_dyn).await.unwrap();
        assert_eq!(output.get_merged_tally(KEY.into(), TallyType::RH_TALLY), TallyColor::Off);

        red.set_state(true);
        green.set_state(true);
        let merged = output.get_merged_tally(KEY.into(), TallyType::RH_TALLY);
        assert_eq!(merged, TallyColor::Amber);
        assert_eq!(output.get_merged_tally(KEY.into(), TallyType::RH_TALLY), merged);

        red.set_state(false);
        assert_eq!(output.get_merged_tally(KEY.into(), TallyType::RH_TALLY), TallyColor::Green);
        red.set_state(true);
        green.set_state(false);
        assert_eq!(output.get_merged_tally(KEY.into(), TallyType::RH_TALLY), TallyColor::Red);
        red.set_state(false);
        assert_eq!(output.get_merged_tally(KEY.into(), TallyType::RH_TALLY), TallyColor::Off);

        //the device follows once the listeners have run
        red.set_state(true);
        green.set_state(true);
        settle().await;
        assert_eq!(output.last_color(KEY, TallyType::RH_TALLY), Some(TallyColor::Amber));
    }

    #[tokio::test]
    async fn merge_starts_from_supplied_tally() {
        let output = rh_output();
        let mut tally = Tally::new(KEY);
        tally.rh_tally = TallyColor::Green;
        assert_eq!(
            output.get_merged_tally((&tally).into(), TallyType::RH_TALLY),
            TallyColor::Green
        );
        assert_eq!(output.get_merged_tally(KEY.into(), TallyType::RH_TALLY), TallyColor::Off);
    }

    #[tokio::test]
    async fn bind_is_idempotent() {
        let input = masked_input("input:000", TallyColor::Red);
        let output = rh_output();
        let out: Arc<dyn Output> = output.clone();
        let inp: Arc<dyn Input> = input.clone();

        bind_to_input(&out, &inp).await.unwrap();
        bind_to_input(&out, &inp).await.unwrap();

        let bindings = output.bindings();
        assert_eq!(bindings.bound_input_ids(), vec!["input:000".to_string()]);
        assert_eq!(bindings.inputs_for_tally(KEY).len(), 1);
        assert_eq!(bindings.bound_tally_keys().len(), 1);
        bindings.assert_consistent();
        //initial state pushed once
        assert_eq!(output.change_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_binds_stay_consistent() {
        let output = rh_output();
        let out: Arc<dyn Output> = output.clone();
        let inputs: Vec<Arc<dyn Input>> = (0..8)
            .map(|ix| masked_input(&format!("input:{ix:03}"), TallyColor::Red) as Arc<dyn Input>)
            .collect();

        let mut handles = Vec::new();
        for input in inputs.iter().chain(inputs.iter()) {
            let out = out.clone();
            let input = input.clone();
            handles.push(tokio::spawn(async move { bind_to_input(&out, &input).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(output.bindings().bound_input_ids().len(), 8);
        assert_eq!(output.bindings().inputs_for_tally(KEY).len(), 8);
        output.bindings().assert_consistent();
    }

    #[tokio::test]
    async fn unbind_then_rebind() {
        let red = masked_input("red:000", TallyColor::Red);
        let green = masked_input("green:000", TallyColor::Green);
        let output = rh_output();
        let out: Arc<dyn Output> = output.clone();
        let (red_dyn, green_dyn): (Arc<dyn Input>, Arc<dyn Input>) = (red.clone(), green.clone());
        bind_to_input(&out, &red_dyn).await.unwrap();
        bind_to_input(&out, &green_dyn).await.unwrap();
        red.set_state(true);
        green.set_state(true);
        let before = output.bindings().bound_tally_keys();

        assert!(unbind_from_input(&out, &red_dyn).await);
        assert!(!unbind_from_input(&out, &red_dyn).await);
        let bindings = output.bindings();
        assert!(!bindings.is_bound("red:000"));
        assert!(bindings
            .bound_tally_keys()
            .values()
            .all(|ids| !ids.contains("red:000")));
        bindings.assert_consistent();
        assert_eq!(output.get_merged_tally(KEY.into(), TallyType::RH_TALLY), TallyColor::Green);

        bind_to_input(&out, &red_dyn).await.unwrap();
        assert_eq!(output.bindings().bound_tally_keys(), before);
        assert_eq!(output.get_merged_tally(KEY.into(), TallyType::RH_TALLY), TallyColor::Amber);
    }

    #[tokio::test]
    async fn unbinding_pushes_the_remaining_merge() {
        let red = masked_input("red:000", TallyColor::Red);
        let green = masked_input("green:000", TallyColor::Green);
        let output = rh_output();
        let out: Arc<dyn Output> = output.clone();
        let (red_dyn, green_dyn): (Arc<dyn Input>, Arc<dyn Input>) = (red.clone(), green.clone());
        bind_to_input(&out, &red_dyn).await.unwrap();
        bind_to_input(&out, &green_dyn).await.unwrap();
        red.set_state(true);
        green.set_state(true);
        settle().await;
        assert_eq!(output.last_color(KEY, TallyType::RH_TALLY), Some(TallyColor::Amber));

        assert!(unbind_from_input(&out, &red_dyn).await);
        assert_eq!(output.last_color(KEY, TallyType::RH_TALLY), Some(TallyColor::Green));
        assert!(unbind_from_input(&out, &green_dyn).await);
        assert_eq!(output.last_color(KEY, TallyType::RH_TALLY), Some(TallyColor::Off));
    }

    #[tokio::test]
    async fn lagged_listener_rebinds_missed_tallies() {
        let input = Arc::new(TableInput::new(MultiTallyConfig::allow_all(None)));
        input.core().assign_id("multi:000").unwrap();
        let output = rh_output();
        let out: Arc<dyn Output> = output.clone();
        let inp: Arc<dyn Input> = input.clone();
        bind_to_input(&out, &inp).await.unwrap();

        //the listener hasn't run yet, so the add falls out of the channel
        input.add_tally(KEY);
        for ix in 0..=100 {
            let color = if ix % 2 == 0 { TallyColor::Green } else { TallyColor::Red };
            input.set_color(KEY, TallyType::RH_TALLY, color);
        }
        settle().await;
        assert!(output.bindings().is_tally_bound("multi:000", KEY));
        assert_eq!(output.last_color(KEY, TallyType::RH_TALLY), Some(TallyColor::Green));

        input.set_color(KEY, TallyType::RH_TALLY, TallyColor::Red);
        settle().await;
        assert_eq!(output.last_color(KEY, TallyType::RH_TALLY), Some(TallyColor::Red));
    }

    #[tokio::test]
    async fn unbound_input_updates_are_ignored() {
        let input = masked_input("input:000", TallyColor::Red);
        let output = rh_output();
        let out: Arc<dyn Output> = output.clone();
        let inp: Arc<dyn Input> = input.clone();
        bind_to_input(&out, &inp).await.unwrap();
        unbind_all(out.as_ref());
        settle().await;

        let count = output.change_count();
        input.set_state(true);
        settle().await;
        assert_eq!(output.change_count(), count);
        assert!(output.bindings().bound_input_ids().is_empty());
    }

    #[tokio::test]
    async fn tallies_added_later_are_bound() {
        let input = Arc::new(TableInput::new(MultiTallyConfig::allow_all(None)));
        input.core().assign_id("multi:000").unwrap();
        let output = RecordingOutput::new(MultiTallyConfig::allow_all(4));
        output.core().assign_id("output:000").unwrap();
        let output = Arc::new(output);
        let out: Arc<dyn Output> = output.clone();
        let inp: Arc<dyn Input> = input.clone();

        bind_to_input(&out, &inp).await.unwrap();
        assert!(output.bindings().bound_tally_keys().is_empty());

        input.add_tally(TallyKey::new(4, 2));
        input.add_tally(TallyKey::new(5, 2));
        settle().await;
        assert_eq!(
            output.bindings().inputs_for_tally(TallyKey::new(4, 2)),
            BTreeSet::from(["multi:000".to_string()])
        );
        assert!(output.bindings().inputs_for_tally(TallyKey::new(5, 2)).is_empty());

        input.set_color(TallyKey::new(4, 2), TallyType::TXT_TALLY, TallyColor::Green);
        input.set_color(TallyKey::new(5, 2), TallyType::TXT_TALLY, TallyColor::Green);
        settle().await;
        assert_eq!(
            output.last_color(TallyKey::new(4, 2), TallyType::TXT_TALLY),
            Some(TallyColor::Green)
        );
        assert_eq!(output.last_color(TallyKey::new(5, 2), TallyType::TXT_TALLY), None);
    }

    #[tokio::test]
    async fn uncovered_lamps_are_not_recomputed() {
        let input = Arc::new(TableInput::new(MultiTallyConfig::allow_all(None)));
        input.core().assign_id("multi:000").unwrap();
        input.add_tally(KEY);
        let output = rh_output();
        let out: Arc<dyn Output> = output.clone();
        let inp: Arc<dyn Input> = input.clone();
        bind_to_input(&out, &inp).await.unwrap();
        let count = output.change_count();

        input.set_color(KEY, TallyType::LH_TALLY, TallyColor::Red);
        settle().await;
        assert_eq!(output.change_count(), count);

        input.set_color(KEY, TallyType::RH_TALLY, TallyColor::Red);
        settle().await;
        assert_eq!(output.change_count(), count + 1);
        assert_eq!(output.last_color(KEY, TallyType::RH_TALLY), Some(TallyColor::Red));
    }

    #[tokio::test]
    async fn binding_requires_an_id() {
        let input: Arc<dyn Input> = Arc::new(TableInput::new(SingleTallyConfig::for_key(
            KEY,
            TallyType::RH_TALLY,
        )));
        let out: Arc<dyn Output> = rh_output();
        assert!(matches!(
            bind_to_input(&out, &input).await,
            Err(TallyError::MissingId { .. })
        ));
    }

    #[tokio::test]
    async fn dropped_inputs_are_skipped() {
        let output = rh_output();
        let out: Arc<dyn Output> = output.clone();
        {
            let input = masked_input("gone:000", TallyColor::Red);
            input.set_state(true);
            let inp: Arc<dyn Input> = input;
            bind_to_input(&out, &inp).await.unwrap();
        }
        assert_eq!(output.get_merged_tally(KEY.into(), TallyType::RH_TALLY), TallyColor::Off);
        assert!(unbind_input_id(&out, "gone:000").await);
    }
}
