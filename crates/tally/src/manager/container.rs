use std::{collections::BTreeMap, sync::Arc};

use futures_util::future::join_all;
use tally_core::{BaseIo, IoRecord, TallyError};
use tokio::sync::broadcast;
use tracing::{debug, error, info};

///Changes to the contents of a container.
#[derive(Debug, Clone, PartialEq)]
pub enum ContainerEvent {
    Added(String),
    Removed(String),
    ///Something changed that should be written to the config.
    Update,
}

///Keyed collection of inputs or outputs.
pub struct IoContainer<T: ?Sized + BaseIo> {
    label: &'static str,
    objects: BTreeMap<String, Arc<T>>,
    running: bool,
    events: broadcast::Sender<ContainerEvent>,
}

impl<T: ?Sized + BaseIo> IoContainer<T> {
    pub fn new(label: &'static str) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            label,
            objects: BTreeMap::new(),
            running: false,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ContainerEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ContainerEvent) {
        //no receivers is fine
        let _ = self.events.send(event);
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn get(&self, key: &str) -> Option<&Arc<T>> {
        self.objects.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    ///Keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.objects.keys().map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = &Arc<T>> {
        self.objects.values()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<T>)> {
        self.objects.iter().map(|(key, obj)| (key.as_str(), obj))
    }

    ///A free key built from the namespace without its first segment, e.g. `gpio.LED:000`.
    pub fn key_for_object(&self, obj: &T) -> String {
        let namespace = obj.namespace();
        let prefix = namespace.split_once('.').map_or(namespace, |(_, rest)| rest);
        (0..)
            .map(|index: u32| format!("{prefix}:{index:03}"))
            .find(|key| !self.objects.contains_key(key))
            .unwrap_or_else(|| prefix.to_string())
    }

    fn pick_key(&self, obj: &T, key: Option<String>) -> String {
        key.or_else(|| {
            obj.id()
                .filter(|id| !self.objects.contains_key(*id))
                .map(str::to_string)
        })
        .unwrap_or_else(|| self.key_for_object(obj))
    }

    ///Add `obj`, opening it if the container is running. Returns its key.
    ///
    ///An object that fails to open is not added.
    pub async fn add(&mut self, obj: Arc<T>, key: Option<String>) -> Result<String, TallyError> {
        let key = self.pick_key(obj.as_ref(), key);
        obj.core().assign_id(&key)?;
        if self.running {
            obj.open().await?;
        }
        if let Some(previous) = self.objects.insert(key.clone(), obj) {
            if let Err(err) = previous.close().await {
                error!(key = %key, "failed to close replaced {}: {err}", self.label);
            }
        }
        debug!(key = %key, "{} added", self.label);
        self.emit(ContainerEvent::Added(key.clone()));
        self.emit(ContainerEvent::Update);
        Ok(key)
    }

    ///Close whatever is stored under `key` and put `obj` there.
    pub async fn replace(&mut self, key: &str, obj: Arc<T>) -> Result<Option<Arc<T>>, TallyError> {
        let old = self.take(key).await;
        self.add(obj, Some(key.to_string())).await?;
        Ok(old)
    }

    async fn take(&mut self, key: &str) -> Option<Arc<T>> {
        let obj = self.objects.remove(key)?;
        if let Err(err) = obj.close().await {
            error!(key, "failed to close {}: {err}", self.label);
        }
        debug!(key, "{} removed", self.label);
        self.emit(ContainerEvent::Removed(key.to_string()));
        Some(obj)
    }

    ///Remove and close the object under `key`.
    pub async fn remove(&mut self, key: &str) -> Option<Arc<T>> {
        let obj = self.take(key).await?;
        self.emit(ContainerEvent::Update);
        Some(obj)
    }

    ///Open every object concurrently. Returns the ones that failed.
    pub async fn open(&mut self) -> Vec<(String, TallyError)> {
        if self.running {
            return Vec::new();
        }
        info!("{}s starting", self.label);
        self.running = true;
        let results = join_all(
            self.objects
                .iter()
                .map(|(key, obj)| async move { (key.clone(), obj.open().await) }),
        )
        .await;
        let failures = collect_failures(results);
        info!(failed = failures.len(), "{}s running", self.label);
        failures
    }

    ///Close every object concurrently. Returns the ones that failed.
    pub async fn close(&mut self) -> Vec<(String, TallyError)> {
        if !self.running {
            return Vec::new();
        }
        info!("{}s stopping", self.label);
        self.running = false;
        let results = join_all(
            self.objects
                .iter()
                .map(|(key, obj)| async move { (key.clone(), obj.close().await) }),
        )
        .await;
        let failures = collect_failures(results);
        info!("{}s stopped", self.label);
        failures
    }

    pub fn serialize(&self) -> Result<BTreeMap<String, IoRecord>, TallyError> {
        self.objects
            .iter()
            .map(|(key, obj)| Ok((key.clone(), obj.serialize()?)))
            .collect()
    }

    ///Build an object for every record with `build`. Records that fail are skipped and returned.
    pub async fn deserialize<F>(
        &mut self,
        records: BTreeMap<String, IoRecord>,
        build: F,
    ) -> Vec<(String, TallyError)>
    where
        F: Fn(&IoRecord) -> Result<Arc<T>, TallyError>,
    {
        let mut failures = Vec::new();
        let mut added = Vec::new();
        for (key, record) in records {
            let obj = match build(&record).and_then(|obj| obj.core().assign_id(&key).map(|_| obj)) {
                Ok(obj) => obj,
                Err(err) => {
                    failures.push((key, err));
                    continue;
                }
            };
            if let Some(previous) = self.objects.insert(key.clone(), obj) {
                if let Err(err) = previous.close().await {
                    error!(key = %key, "failed to close replaced {}: {err}", self.label);
                }
            }
            added.push(key);
        }
        if self.running {
            let results = join_all(added.iter().filter_map(|key| {
                let obj = self.objects.get(key)?.clone();
                let key = key.clone();
                Some(async move { (key, obj.open().await) })
            }))
            .await;
            for (key, err) in collect_failures(results) {
                self.objects.remove(&key);
                failures.push((key, err));
            }
        }
        for key in added.into_iter().filter(|key| self.objects.contains_key(key)) {
            self.emit(ContainerEvent::Added(key));
        }
        failures
    }
}

fn collect_failures(results: Vec<(String, Result<(), TallyError>)>) -> Vec<(String, TallyError)> {
    results
        .into_iter()
        .filter_map(|(key, result)| result.err().map(|err| (key, err)))
        .collect()
}
