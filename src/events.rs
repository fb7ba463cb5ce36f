//! Event queue: accumulates pushed events until they are submitted.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use derive_more::From;
use serde::{Deserialize, Serialize};

use crate::{model::Variables, storage::Storage};

/// Raw properties of a pushed event.
///
/// # Examples
/// ```
/// # use jentis::Properties;
/// let properties = [
///     ("track".to_owned(), "product".into()),
///     ("id".to_owned(), "123".into()),
///     ("brutto".to_owned(), 199.99.into()),
/// ].into_iter().collect::<Properties>();
/// ```
pub type Properties = HashMap<String, PropertyValue>;

/// Value of a pushed property.
///
/// Only string values are tracked. Other values are accepted so callers can pass loosely typed
/// data through, but they are dropped (with a warning) when the event is pushed.
#[derive(Debug, Serialize, Deserialize, PartialEq, PartialOrd, From, Clone)]
#[serde(untagged)]
pub enum PropertyValue {
    /// A string value. The only kind that is tracked.
    String(String),
    /// A numeric value.
    Number(f64),
    /// A boolean value.
    Boolean(bool),
    /// Absent value.
    Null,
}

impl PropertyValue {
    /// Contained string, if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        if let PropertyValue::String(s) = self {
            Some(s.as_str())
        } else {
            None
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

/// Property holding the command of an event.
pub const TRACK_KEY: &str = "track";
/// Property holding the dependency type of an event.
pub const TYPE_KEY: &str = "type";

/// Command used when an event has no `track` property.
pub const DEFAULT_TRACK_COMMAND: &str = "defaultTrackCommand";
/// Type used when an event has no `type` property.
pub const DEFAULT_DEPENDENCY_TYPE: &str = "defaultDependencyType";

/// Command appended after all pushed commands of a submission.
pub const SUBMIT_COMMAND: &str = "submit";

/// A queued event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushedEvent {
    /// Event command, reported in `jtspushedcommands`.
    pub track: String,
    /// Dependency type of the event.
    #[serde(rename = "type")]
    pub event_type: String,
    /// String properties except the reserved `track` and `type`.
    pub properties: HashMap<String, String>,
}

impl PushedEvent {
    /// Validate raw properties. Never fails: reserved keys are extracted, non-string values are
    /// dropped.
    pub fn from_properties(properties: Properties) -> PushedEvent {
        let mut track = None;
        let mut event_type = None;
        let mut filtered = HashMap::with_capacity(properties.len());

        for (key, value) in properties {
            let reserved = key == TRACK_KEY || key == TYPE_KEY;
            match value {
                PropertyValue::String(value) if key == TRACK_KEY => track = Some(value),
                PropertyValue::String(value) if key == TYPE_KEY => event_type = Some(value),
                PropertyValue::String(value) => {
                    filtered.insert(key, value);
                }
                _ if reserved => {
                    log::warn!(target: "jentis", key = key.as_str(); "ignoring non-string reserved property");
                }
                value => {
                    log::warn!(target: "jentis", key = key.as_str(), value:? = value;
                               "dropping non-string custom property");
                }
            }
        }

        PushedEvent {
            track: track.unwrap_or_else(|| DEFAULT_TRACK_COMMAND.to_owned()),
            event_type: event_type.unwrap_or_else(|| DEFAULT_DEPENDENCY_TYPE.to_owned()),
            properties: filtered,
        }
    }

    /// Same as [`PushedEvent::from_properties`] for a raw JSON object. Nested objects and arrays
    /// are dropped like any other non-string value. Anything but an object yields an event
    /// without properties.
    pub fn from_json(value: serde_json::Value) -> PushedEvent {
        let serde_json::Value::Object(map) = value else {
            log::warn!(target: "jentis", "pushed value is not a JSON object");
            return PushedEvent::from_properties(Properties::new());
        };

        let mut properties = Properties::with_capacity(map.len());
        for (key, value) in map {
            let value = match value {
                serde_json::Value::String(s) => PropertyValue::String(s),
                serde_json::Value::Bool(b) => PropertyValue::Boolean(b),
                serde_json::Value::Null => PropertyValue::Null,
                serde_json::Value::Number(n) => match n.as_f64() {
                    Some(n) => PropertyValue::Number(n),
                    None => PropertyValue::Null,
                },
                value @ (serde_json::Value::Array(_) | serde_json::Value::Object(_)) => {
                    log::warn!(target: "jentis", key = key.as_str(), value:% = value;
                               "dropping nested custom property");
                    continue;
                }
            };
            properties.insert(key, value);
        }
        PushedEvent::from_properties(properties)
    }
}

/// Events taken out of the queue for one submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventBatch {
    events: Vec<PushedEvent>,
}

impl EventBatch {
    #[cfg(test)]
    pub fn events(&self) -> &[PushedEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Each event's command in push order, followed by [`SUBMIT_COMMAND`].
    pub fn pushed_commands(&self) -> Vec<String> {
        self.events
            .iter()
            .map(|event| event.track.clone())
            .chain(std::iter::once(SUBMIT_COMMAND.to_owned()))
            .collect()
    }

    /// Properties of all events merged in push order; a later event overwrites an earlier value
    /// of the same key.
    pub fn merged_properties(&self) -> HashMap<String, String> {
        let mut merged = HashMap::new();
        for event in &self.events {
            for (key, value) in &event.properties {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged
    }

    /// Every `product_id` property in push order.
    pub fn product_ids(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|event| event.properties.get(Variables::PRODUCT_ID).cloned())
            .collect()
    }

    /// Submission variables of this batch.
    pub fn to_variables(&self) -> Variables {
        Variables::from_properties(
            self.merged_properties(),
            self.pushed_commands(),
            self.product_ids(),
        )
    }
}

/// Where the queue mirrors its content, if anywhere.
struct Persistence {
    storage: Arc<dyn Storage>,
    key: String,
}

/// Ordered queue of pushed events.
///
/// The queue is the only owner of its events: [`EventQueue::drain`] is the only way to consume
/// them and takes the whole batch atomically, so an event is never part of two submissions.
pub struct EventQueue {
    events: Mutex<Vec<PushedEvent>>,
    persistence: Option<Persistence>,
}

impl EventQueue {
    /// Create an empty in-memory queue.
    pub fn new() -> EventQueue {
        EventQueue {
            events: Mutex::new(Vec::new()),
            persistence: None,
        }
    }

    /// Create a queue mirrored into `storage` under `{container}_pending_events`. Events
    /// persisted by a previous process are loaded.
    pub fn persistent(storage: Arc<dyn Storage>, container: &str) -> EventQueue {
        let key = pending_events_key(container);

        let events: Vec<PushedEvent> = match storage.get(&key) {
            Some(record) => serde_json::from_str(&record).unwrap_or_else(|err| {
                log::warn!(target: "jentis", key = key.as_str(); "ignoring invalid pending events: {err}");
                Vec::new()
            }),
            None => Vec::new(),
        };
        if !events.is_empty() {
            log::info!(target: "jentis", count = events.len(); "restored pending events");
        }

        EventQueue {
            events: Mutex::new(events),
            persistence: Some(Persistence { storage, key }),
        }
    }

    /// Validate `properties` and append the resulting event.
    pub fn push(&self, properties: Properties) {
        self.push_event(PushedEvent::from_properties(properties));
    }

    pub fn push_event(&self, event: PushedEvent) {
        log::debug!(target: "jentis", track = event.track.as_str(), event_type = event.event_type.as_str();
                    "event pushed");
        let mut events = self.lock();
        events.push(event);
        self.persist(&events);
    }

    /// Take all queued events, leaving the queue empty.
    pub fn drain(&self) -> EventBatch {
        let mut events = self.lock();
        let batch = EventBatch {
            events: std::mem::take(&mut *events),
        };
        self.persist(&events);
        batch
    }

    /// Put a drained batch back in front of events pushed since it was taken.
    pub fn restore(&self, batch: EventBatch) {
        if batch.is_empty() {
            return;
        }
        let mut events = self.lock();
        let newer = std::mem::replace(&mut *events, batch.events);
        events.extend(newer);
        self.persist(&events);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop all events, including the persisted copy.
    pub fn clear(&self) {
        let mut events = self.lock();
        events.clear();
        if let Some(persistence) = &self.persistence {
            if let Err(err) = persistence.storage.remove(&persistence.key) {
                log::warn!(target: "jentis", "failed to remove pending events: {err}");
            }
        }
    }

    fn persist(&self, events: &[PushedEvent]) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        let result = serde_json::to_string(events)
            .map_err(crate::Error::from)
            .and_then(|record| persistence.storage.set(&persistence.key, record));
        if let Err(err) = result {
            log::warn!(target: "jentis", "failed to persist pending events: {err}");
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<PushedEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventQueue {
    fn default() -> EventQueue {
        EventQueue::new()
    }
}

pub(crate) fn pending_events_key(container: &str) -> String {
    format!("{container}_pending_events")
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Arc};

    use serde_json::json;

    use super::{EventQueue, Properties, PropertyValue, PushedEvent};
    use crate::storage::{MemoryStorage, Storage};

    fn props<const N: usize>(pairs: [(&str, PropertyValue); N]) -> Properties {
        pairs
            .into_iter()
            .map(|(key, value)| (key.to_owned(), value))
            .collect()
    }

    #[test]
    fn defaults_when_reserved_keys_are_missing() {
        let event = PushedEvent::from_properties(props([("a", "1".into())]));

        assert_eq!(event.track, "defaultTrackCommand");
        assert_eq!(event.event_type, "defaultDependencyType");
    }

    #[test]
    fn reserved_keys_never_reach_properties() {
        let queue = EventQueue::new();
        queue.push(props([
            ("track", "x".into()),
            ("type", "y".into()),
            ("a", "1".into()),
        ]));
        queue.push(props([("track", "z".into()), ("type", 5.0.into())]));

        let batch = queue.drain();
        let merged = batch.merged_properties();

        assert!(!merged.contains_key("track"));
        assert!(!merged.contains_key("type"));
        assert_eq!(batch.events()[0].event_type, "y");
        assert_eq!(batch.events()[1].event_type, "defaultDependencyType");
        assert_eq!(batch.pushed_commands(), ["x", "z", "submit"]);
    }

    #[test]
    fn later_events_overwrite_earlier_properties() {
        let queue = EventQueue::new();
        queue.push(props([("a", "1".into())]));
        queue.push(props([("a", "2".into()), ("b", "3".into())]));

        let batch = queue.drain();

        assert_eq!(
            batch.merged_properties(),
            HashMap::from([("a".to_owned(), "2".to_owned()), ("b".to_owned(), "3".to_owned())])
        );
        assert_eq!(
            batch.pushed_commands(),
            ["defaultTrackCommand", "defaultTrackCommand", "submit"]
        );
    }

    #[test]
    fn non_string_values_are_dropped() {
        let queue = EventQueue::new();
        queue.push(props([("price", 9.99.into()), ("flag", true.into())]));
        queue.push_event(PushedEvent::from_json(json!({
            "nested": {"a": "b"},
            "list": ["1"],
            "name": "kept",
        })));
        queue.push(props([("price", "9.99".into())]));

        let merged = queue.drain().merged_properties();

        assert_eq!(
            merged,
            HashMap::from([
                ("price".to_owned(), "9.99".to_owned()),
                ("name".to_owned(), "kept".to_owned()),
            ])
        );
    }

    #[test]
    fn empty_batch_only_has_submit_command() {
        let batch = EventQueue::new().drain();

        assert!(batch.is_empty());
        assert_eq!(batch.pushed_commands(), ["submit"]);
        assert!(batch.merged_properties().is_empty());
    }

    #[test]
    fn drain_empties_queue() {
        let queue = EventQueue::new();
        queue.push(props([("a", "1".into())]));
        queue.push(props([("b", "2".into())]));
        assert_eq!(queue.len(), 2);

        let batch = queue.drain();

        assert_eq!(batch.len(), 2);
        assert!(queue.is_empty());
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn restore_puts_batch_before_newer_events() {
        let queue = EventQueue::new();
        queue.push(props([("track", "first".into())]));
        let batch = queue.drain();
        queue.push(props([("track", "second".into())]));

        queue.restore(batch);

        assert_eq!(
            queue.drain().pushed_commands(),
            ["first", "second", "submit"]
        );
    }

    #[test]
    fn product_ids_are_collected_in_push_order() {
        let queue = EventQueue::new();
        queue.push(props([("track", "product".into()), ("product_id", "111".into())]));
        queue.push(props([("track", "product".into()), ("product_id", "222".into())]));

        let variables = queue.drain().to_variables();

        assert_eq!(variables.product_id, ["111", "222"]);
        assert!(!variables.custom.contains_key("product_id"));
    }

    #[test]
    fn concurrent_pushes_are_not_lost_or_duplicated() {
        let queue = Arc::new(EventQueue::new());

        let handles: Vec<_> = (0..4)
            .map(|thread| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    let mut drained = 0;
                    for i in 0..100 {
                        queue.push(props([("n", format!("{thread}-{i}").into())]));
                        if i % 10 == 0 {
                            drained += queue.drain().len();
                        }
                    }
                    drained
                })
            })
            .collect();

        let drained: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(drained + queue.drain().len(), 400);
    }

    #[test]
    fn persistent_queue_survives_restart() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());

        {
            let queue = EventQueue::persistent(storage.clone(), "acme");
            queue.push(props([("track", "pageview".into())]));
        }

        let queue = EventQueue::persistent(storage.clone(), "acme");
        assert_eq!(queue.len(), 1);

        queue.drain();
        assert_eq!(EventQueue::persistent(storage.clone(), "acme").len(), 0);

        queue.push(props([("a", "1".into())]));
        queue.clear();
        assert_eq!(storage.get("acme_pending_events"), None);
    }
}
