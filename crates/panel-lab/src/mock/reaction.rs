//! Synchronous property-cascade engine.
//!
//! Reaction rules are pure functions over `(store view, change event)`
//! returning derived mutations, so cascade semantics are unit-testable
//! without spawning a single process. Rules fire synchronously with the
//! triggering write; derived mutations re-enter the model (bounded by
//! [`MAX_CASCADE_DEPTH`]) so multi-hop cascades complete before the
//! triggering call returns.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::mock::property::{Mutation, PropValue, PropertyChangeEvent};

/// Upper bound on reaction recursion. A cascade deeper than this is a
/// template bug; the engine truncates and warns rather than looping.
pub const MAX_CASCADE_DEPTH: usize = 8;

/// Read access to the live property tables of every mock service.
///
/// Object keys identify one property set on a service: a bare interface
/// name for singleton objects (`org.gnome.SettingsDaemon.Rfkill`) or an
/// `interface:discriminator` key for enumerable objects
/// (`org.bluez.Device1:22:33:44:55:66:77`).
pub trait StoreView {
    fn get(&self, service: &str, object: &str, key: &str) -> Option<PropValue>;

    /// Whether the object is currently registered on the service at all.
    /// Absence means "not present", never "blocked".
    fn has_object(&self, service: &str, object: &str) -> bool;
}

/// A reaction rule: trigger coordinates plus a pure reaction function.
pub struct ReactionRule {
    /// Service whose writes this rule observes.
    pub service: String,
    /// Object (interface) the trigger key lives on.
    pub object: String,
    /// Property key that triggers the reaction.
    pub key: String,
    /// Pure function computing derived mutations.
    pub react: fn(&dyn StoreView, &PropertyChangeEvent) -> Vec<Mutation>,
}

impl ReactionRule {
    fn matches(&self, event: &PropertyChangeEvent) -> bool {
        event.service == self.service
            && event.interface == self.object
            && event.changed.contains_key(&self.key)
    }
}

/// The reactive model: every registered rule across all live templates.
#[derive(Default)]
pub struct ReactiveModel {
    rules: Vec<ReactionRule>,
}

impl ReactiveModel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, rule: ReactionRule) {
        self.rules.push(rule);
    }

    pub fn register_all(&mut self, rules: Vec<ReactionRule>) {
        self.rules.extend(rules);
    }

    /// Drop every rule observing writes on `service`.
    pub fn unregister_service(&mut self, service: &str) {
        self.rules.retain(|rule| rule.service != service);
    }

    /// Run all matching rules for `event`, applying derived mutations to
    /// `store` and recursing on the events those applications produce.
    ///
    /// Returns every derived event in application order. Mutations whose
    /// target object is absent are dropped silently: an absent peer means
    /// the write is recorded with no side effect.
    pub fn cascade(
        &self,
        store: &mut ServiceStateStore,
        event: &PropertyChangeEvent,
    ) -> Vec<PropertyChangeEvent> {
        self.cascade_at(store, event, 0)
    }

    fn cascade_at(
        &self,
        store: &mut ServiceStateStore,
        event: &PropertyChangeEvent,
        depth: usize,
    ) -> Vec<PropertyChangeEvent> {
        if depth >= MAX_CASCADE_DEPTH {
            warn!(
                service = %event.service,
                object = %event.interface,
                depth,
                "cascade depth limit reached, truncating"
            );
            return Vec::new();
        }

        let mut pending = Vec::new();
        for rule in &self.rules {
            if rule.matches(event) {
                pending.extend((rule.react)(store, event));
            }
        }

        let mut emitted = Vec::new();
        for mutation in pending {
            if let Some(derived) = store.apply(&mutation) {
                emitted.push(derived.clone());
                emitted.extend(self.cascade_at(store, &derived, depth + 1));
            }
        }
        emitted
    }
}

/// In-memory property tables for every live mock service.
///
/// Keyed `service -> object -> key -> value`. The orchestrator owns one of
/// these as the authoritative state; reaction unit tests use it directly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStateStore {
    tables: BTreeMap<String, BTreeMap<String, BTreeMap<String, PropValue>>>,
}

impl ServiceStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an empty table for a service.
    pub fn add_service(&mut self, service: &str) {
        self.tables.entry(service.to_string()).or_default();
    }

    /// Drop a service and every object on it.
    pub fn remove_service(&mut self, service: &str) {
        self.tables.remove(service);
    }

    #[must_use]
    pub fn has_service(&self, service: &str) -> bool {
        self.tables.contains_key(service)
    }

    /// Register an object with its initial properties on a service.
    pub fn insert_object(
        &mut self,
        service: &str,
        object: &str,
        props: BTreeMap<String, PropValue>,
    ) {
        self.tables
            .entry(service.to_string())
            .or_default()
            .insert(object.to_string(), props);
    }

    /// Remove an object; subsequent reads report it as not present.
    pub fn remove_object(&mut self, service: &str, object: &str) {
        if let Some(objects) = self.tables.get_mut(service) {
            objects.remove(object);
        }
    }

    /// Object keys currently registered on a service, in sorted order.
    #[must_use]
    pub fn objects(&self, service: &str) -> Vec<String> {
        self.tables
            .get(service)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Apply one mutation. Returns the change event, or `None` when the
    /// target service or object is absent (the write has no effect).
    pub fn apply(&mut self, mutation: &Mutation) -> Option<PropertyChangeEvent> {
        let props = self
            .tables
            .get_mut(&mutation.service)?
            .get_mut(&mutation.interface)?;
        props.insert(mutation.key.clone(), mutation.value.clone());
        Some(PropertyChangeEvent::single(
            &mutation.service,
            &mutation.interface,
            &mutation.key,
            mutation.value.clone(),
        ))
    }
}

impl StoreView for ServiceStateStore {
    fn get(&self, service: &str, object: &str, key: &str) -> Option<PropValue> {
        self.tables.get(service)?.get(object)?.get(key).cloned()
    }

    fn has_object(&self, service: &str, object: &str) -> bool {
        self.tables
            .get(service)
            .is_some_and(|objects| objects.contains_key(object))
    }
}
