//! Mock-service templates: default property surfaces and reaction rules.
//!
//! Each template names a simulated system service, the objects it exposes,
//! the initial property values (overridable by recognized parameters), and
//! the cascade rules bound to property writes. The rfkill/bluez pair carries
//! the radio kill-switch semantics the bluetooth panel depends on.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::mock::property::{Mutation, PropValue, PropertyChangeEvent};
use crate::mock::reaction::{ReactionRule, StoreView};

// Canonical service registry names.
pub const RFKILL_SERVICE: &str = "rfkill";
pub const BLUEZ_SERVICE: &str = "bluez";
pub const UPOWER_SERVICE: &str = "upower";
pub const POWER_PROFILES_SERVICE: &str = "power-profiles";
pub const LOGIND_SERVICE: &str = "logind";

// Object (interface) keys.
pub const RFKILL_IFACE: &str = "org.gnome.SettingsDaemon.Rfkill";
pub const ADAPTER_OBJECT: &str = "org.bluez.Adapter1";
pub const DEVICE_IFACE: &str = "org.bluez.Device1";
pub const UPOWER_IFACE: &str = "org.freedesktop.UPower";
pub const POWER_PROFILES_IFACE: &str = "org.freedesktop.UPower.PowerProfiles";
pub const LOGIND_IFACE: &str = "org.freedesktop.login1.Manager";

// rfkill property keys.
pub const AIRPLANE_MODE: &str = "AirplaneMode";
pub const BT_AIRPLANE_MODE: &str = "BluetoothAirplaneMode";
pub const BT_HARDWARE_AIRPLANE_MODE: &str = "BluetoothHardwareAirplaneMode";
pub const BT_HAS_AIRPLANE_MODE: &str = "BluetoothHasAirplaneMode";

// Adapter property keys.
pub const POWERED: &str = "Powered";
pub const BLOCKED: &str = "Blocked";

/// Object key for an enumerable bluetooth device, discriminated by address.
#[must_use]
pub fn device_object(address: &str) -> String {
    format!("{DEVICE_IFACE}:{address}")
}

/// A named, reusable definition of a mock service's initial state and
/// reaction rules.
pub struct TemplateDescriptor {
    /// Template name, also the canonical registry name of the service.
    pub name: &'static str,
    /// Object path the spawned mock server claims on the bus.
    pub object_path: &'static str,
    /// Initial objects and their property values.
    pub defaults: fn() -> BTreeMap<String, BTreeMap<String, PropValue>>,
    /// Recognized parameters: `(param, target object, target key)`.
    pub params: &'static [(&'static str, &'static str, &'static str)],
    /// Reaction rules, bound to the registered service name.
    pub rules: fn(&str) -> Vec<ReactionRule>,
}

/// All known templates, keyed by template name.
#[must_use]
pub fn registry() -> BTreeMap<&'static str, TemplateDescriptor> {
    let mut templates = BTreeMap::new();
    for descriptor in [rfkill(), bluez(), upower(), power_profiles(), logind()] {
        templates.insert(descriptor.name, descriptor);
    }
    templates
}

fn no_rules(_service: &str) -> Vec<ReactionRule> {
    Vec::new()
}

// ---------------------------------------------------------------------------
// rfkill
// ---------------------------------------------------------------------------

fn rfkill() -> TemplateDescriptor {
    TemplateDescriptor {
        name: RFKILL_SERVICE,
        object_path: "/org/gnome/SettingsDaemon/Rfkill",
        defaults: || {
            let mut props = BTreeMap::new();
            props.insert(AIRPLANE_MODE.to_string(), PropValue::Bool(false));
            props.insert(BT_AIRPLANE_MODE.to_string(), PropValue::Bool(false));
            props.insert(BT_HARDWARE_AIRPLANE_MODE.to_string(), PropValue::Bool(false));
            props.insert(BT_HAS_AIRPLANE_MODE.to_string(), PropValue::Bool(true));
            props.insert("HardwareAirplaneMode".to_string(), PropValue::Bool(false));
            props.insert("HasAirplaneMode".to_string(), PropValue::Bool(true));
            props.insert("ShouldShowAirplaneMode".to_string(), PropValue::Bool(true));
            let mut objects = BTreeMap::new();
            objects.insert(RFKILL_IFACE.to_string(), props);
            objects
        },
        params: &[
            ("initial-airplane-mode", RFKILL_IFACE, AIRPLANE_MODE),
            ("initial-bluetooth-airplane-mode", RFKILL_IFACE, BT_AIRPLANE_MODE),
            (
                "initial-hardware-airplane-mode",
                RFKILL_IFACE,
                BT_HARDWARE_AIRPLANE_MODE,
            ),
            ("has-airplane-mode", RFKILL_IFACE, "HasAirplaneMode"),
        ],
        rules: rfkill_rules,
    }
}

/// Cascade rules for the rfkill service, bound to its registered name.
///
/// The peer adapter is addressed by its canonical registry name; when no
/// adapter is registered the software flag write is recorded with no side
/// effect.
pub fn rfkill_rules(service: &str) -> Vec<ReactionRule> {
    vec![
        // Software kill flag drives the peer adapter's hardware state.
        ReactionRule {
            service: service.to_string(),
            object: RFKILL_IFACE.to_string(),
            key: BT_AIRPLANE_MODE.to_string(),
            react: software_flag_reaction,
        },
        // Hardware kill-switch debounce: a hardware transition while the
        // software flag is already clear resets the derived bluetooth flag,
        // so the two never drift apart across unplug/replug.
        ReactionRule {
            service: service.to_string(),
            object: RFKILL_IFACE.to_string(),
            key: BT_HARDWARE_AIRPLANE_MODE.to_string(),
            react: hardware_switch_reaction,
        },
    ]
}

fn software_flag_reaction(
    view: &dyn StoreView,
    event: &PropertyChangeEvent,
) -> Vec<Mutation> {
    let Some(flag) = event
        .changed
        .get(BT_AIRPLANE_MODE)
        .and_then(PropValue::as_bool)
    else {
        return Vec::new();
    };
    if !view.has_object(BLUEZ_SERVICE, ADAPTER_OBJECT) {
        return Vec::new();
    }
    if flag {
        vec![
            Mutation::new(BLUEZ_SERVICE, ADAPTER_OBJECT, POWERED, false.into()),
            Mutation::new(BLUEZ_SERVICE, ADAPTER_OBJECT, BLOCKED, true.into()),
        ]
    } else {
        // Powered is left for the owning component to restore.
        vec![Mutation::new(
            BLUEZ_SERVICE,
            ADAPTER_OBJECT,
            BLOCKED,
            false.into(),
        )]
    }
}

fn hardware_switch_reaction(
    view: &dyn StoreView,
    event: &PropertyChangeEvent,
) -> Vec<Mutation> {
    let software_flag = view
        .get(&event.service, RFKILL_IFACE, AIRPLANE_MODE)
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if software_flag {
        // Software flag still asserted: the rehydration path is owned by
        // the component that asserted it.
        return Vec::new();
    }
    vec![Mutation::new(
        &event.service,
        RFKILL_IFACE,
        BT_AIRPLANE_MODE,
        false.into(),
    )]
}

// ---------------------------------------------------------------------------
// bluez
// ---------------------------------------------------------------------------

fn bluez() -> TemplateDescriptor {
    TemplateDescriptor {
        name: BLUEZ_SERVICE,
        object_path: "/org/bluez",
        defaults: || {
            let mut objects = BTreeMap::new();
            objects.insert(ADAPTER_OBJECT.to_string(), default_adapter_props());
            objects
        },
        params: &[
            ("initial-powered", ADAPTER_OBJECT, POWERED),
            ("initial-blocked", ADAPTER_OBJECT, BLOCKED),
        ],
        rules: no_rules,
    }
}

/// Property set for a freshly plugged default adapter.
#[must_use]
pub fn default_adapter_props() -> BTreeMap<String, PropValue> {
    let mut props = BTreeMap::new();
    props.insert("Name".to_string(), PropValue::Str("hci0".to_string()));
    props.insert(
        "Address".to_string(),
        PropValue::Str("00:11:22:33:44:55".to_string()),
    );
    props.insert(POWERED.to_string(), PropValue::Bool(true));
    props.insert(BLOCKED.to_string(), PropValue::Bool(false));
    props.insert("Discovering".to_string(), PropValue::Bool(false));
    props
}

/// Property set for a paired bluetooth device.
#[must_use]
pub fn paired_device_props(address: &str, name: &str, class: u32, icon: &str) -> BTreeMap<String, PropValue> {
    let mut props = BTreeMap::new();
    props.insert("Address".to_string(), PropValue::Str(address.to_string()));
    props.insert("Name".to_string(), PropValue::Str(name.to_string()));
    props.insert("Paired".to_string(), PropValue::Bool(true));
    props.insert("Class".to_string(), PropValue::U32(class));
    props.insert("Icon".to_string(), PropValue::Str(icon.to_string()));
    props
}

// ---------------------------------------------------------------------------
// upower / power-profiles / logind
// ---------------------------------------------------------------------------

fn upower() -> TemplateDescriptor {
    TemplateDescriptor {
        name: UPOWER_SERVICE,
        object_path: "/org/freedesktop/UPower",
        defaults: || {
            let mut props = BTreeMap::new();
            props.insert(
                "DaemonVersion".to_string(),
                PropValue::Str("0.99.20".to_string()),
            );
            props.insert("OnBattery".to_string(), PropValue::Bool(false));
            props.insert("LidIsPresent".to_string(), PropValue::Bool(true));
            props.insert("LidIsClosed".to_string(), PropValue::Bool(false));
            let mut objects = BTreeMap::new();
            objects.insert(UPOWER_IFACE.to_string(), props);
            objects
        },
        params: &[
            ("on-battery", UPOWER_IFACE, "OnBattery"),
            ("lid-present", UPOWER_IFACE, "LidIsPresent"),
        ],
        rules: no_rules,
    }
}

fn power_profiles() -> TemplateDescriptor {
    TemplateDescriptor {
        name: POWER_PROFILES_SERVICE,
        object_path: "/org/freedesktop/UPower/PowerProfiles",
        defaults: || {
            let mut props = BTreeMap::new();
            props.insert(
                "ActiveProfile".to_string(),
                PropValue::Str("balanced".to_string()),
            );
            props.insert(
                "PerformanceDegraded".to_string(),
                PropValue::Str(String::new()),
            );
            let mut objects = BTreeMap::new();
            objects.insert(POWER_PROFILES_IFACE.to_string(), props);
            objects
        },
        params: &[("initial-profile", POWER_PROFILES_IFACE, "ActiveProfile")],
        rules: no_rules,
    }
}

fn logind() -> TemplateDescriptor {
    TemplateDescriptor {
        name: LOGIND_SERVICE,
        object_path: "/org/freedesktop/login1",
        defaults: || {
            let mut props = BTreeMap::new();
            props.insert("Docked".to_string(), PropValue::Bool(false));
            props.insert("PreparingForSleep".to_string(), PropValue::Bool(false));
            let mut objects = BTreeMap::new();
            objects.insert(LOGIND_IFACE.to_string(), props);
            objects
        },
        params: &[],
        rules: no_rules,
    }
}

/// Degraded-performance enumeration cycled by the power scenario.
#[must_use]
pub fn next_degraded(current: &str) -> &'static str {
    match current {
        "" => "lap-detected",
        "lap-detected" => "high-operating-temperature",
        _ => "",
    }
}

// ---------------------------------------------------------------------------
// AdapterState
// ---------------------------------------------------------------------------

/// Derived radio-adapter view over the bluez mock.
///
/// An absent adapter reads as not present; `blocked`/`powered` are only
/// meaningful while `present` holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterState {
    pub present: bool,
    pub powered: bool,
    pub blocked: bool,
}

impl AdapterState {
    #[must_use]
    pub fn absent() -> Self {
        Self {
            present: false,
            powered: false,
            blocked: false,
        }
    }

    /// Read the current adapter state from the live property tables.
    #[must_use]
    pub fn query(view: &dyn StoreView) -> Self {
        if !view.has_object(BLUEZ_SERVICE, ADAPTER_OBJECT) {
            return Self::absent();
        }
        let read = |key: &str| {
            view.get(BLUEZ_SERVICE, ADAPTER_OBJECT, key)
                .and_then(|v| v.as_bool())
                .unwrap_or(false)
        };
        Self {
            present: true,
            powered: read(POWERED),
            blocked: read(BLOCKED),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::reaction::{ReactiveModel, ServiceStateStore};

    fn rfkill_bluez_store() -> ServiceStateStore {
        let mut store = ServiceStateStore::new();
        for (service, descriptor) in [(RFKILL_SERVICE, rfkill()), (BLUEZ_SERVICE, bluez())] {
            store.add_service(service);
            for (object, props) in (descriptor.defaults)() {
                store.insert_object(service, &object, props);
            }
        }
        store
    }

    fn model() -> ReactiveModel {
        let mut model = ReactiveModel::new();
        model.register_all(rfkill_rules(RFKILL_SERVICE));
        model
    }

    fn write(
        store: &mut ServiceStateStore,
        model: &ReactiveModel,
        key: &str,
        value: PropValue,
    ) {
        let mutation = Mutation::new(RFKILL_SERVICE, RFKILL_IFACE, key, value);
        let event = store.apply(&mutation).expect("rfkill registered");
        model.cascade(store, &event);
    }

    #[test]
    fn software_flag_true_blocks_and_unpowers_peer() {
        let (mut store, model) = (rfkill_bluez_store(), model());
        write(&mut store, &model, BT_AIRPLANE_MODE, true.into());

        let adapter = AdapterState::query(&store);
        assert!(adapter.present);
        assert!(!adapter.powered);
        assert!(adapter.blocked);
    }

    #[test]
    fn software_flag_false_unblocks_without_touching_powered() {
        let (mut store, model) = (rfkill_bluez_store(), model());
        // Explicitly unpower first, then clear the flag.
        store
            .apply(&Mutation::new(
                BLUEZ_SERVICE,
                ADAPTER_OBJECT,
                POWERED,
                false.into(),
            ))
            .unwrap();
        write(&mut store, &model, BT_AIRPLANE_MODE, false.into());

        let adapter = AdapterState::query(&store);
        assert!(!adapter.blocked);
        assert!(!adapter.powered, "powered must keep its last explicit value");
    }

    #[test]
    fn software_flag_with_no_peer_is_recorded_without_side_effect() {
        let mut store = ServiceStateStore::new();
        store.add_service(RFKILL_SERVICE);
        for (object, props) in (rfkill().defaults)() {
            store.insert_object(RFKILL_SERVICE, &object, props);
        }
        let model = model();
        write(&mut store, &model, BT_AIRPLANE_MODE, true.into());

        assert_eq!(
            store.get(RFKILL_SERVICE, RFKILL_IFACE, BT_AIRPLANE_MODE),
            Some(PropValue::Bool(true))
        );
        assert_eq!(AdapterState::query(&store), AdapterState::absent());
    }

    #[test]
    fn hardware_switch_resets_stale_software_flag() {
        let (mut store, model) = (rfkill_bluez_store(), model());
        // Drift the bluetooth flag without going through the model.
        store
            .apply(&Mutation::new(
                RFKILL_SERVICE,
                RFKILL_IFACE,
                BT_AIRPLANE_MODE,
                true.into(),
            ))
            .unwrap();

        write(&mut store, &model, BT_HARDWARE_AIRPLANE_MODE, true.into());

        assert_eq!(
            store.get(RFKILL_SERVICE, RFKILL_IFACE, BT_AIRPLANE_MODE),
            Some(PropValue::Bool(false))
        );
        // The reset cascades: the adapter ends unblocked.
        assert!(!AdapterState::query(&store).blocked);
    }

    #[test]
    fn hardware_switch_with_software_flag_set_leaves_powered_alone() {
        let (mut store, model) = (rfkill_bluez_store(), model());
        store
            .apply(&Mutation::new(
                RFKILL_SERVICE,
                RFKILL_IFACE,
                AIRPLANE_MODE,
                true.into(),
            ))
            .unwrap();

        let powered_before = AdapterState::query(&store).powered;
        write(&mut store, &model, BT_HARDWARE_AIRPLANE_MODE, true.into());

        assert_eq!(AdapterState::query(&store).powered, powered_before);
    }

    #[test]
    fn removed_adapter_reads_absent_not_blocked() {
        let (mut store, model) = (rfkill_bluez_store(), model());
        write(&mut store, &model, BT_AIRPLANE_MODE, true.into());
        store.remove_object(BLUEZ_SERVICE, ADAPTER_OBJECT);

        let adapter = AdapterState::query(&store);
        assert!(!adapter.present);
        assert!(!adapter.blocked);
    }

    #[test]
    fn degraded_cycle_wraps() {
        assert_eq!(next_degraded(""), "lap-detected");
        assert_eq!(next_degraded("lap-detected"), "high-operating-temperature");
        assert_eq!(next_degraded("high-operating-temperature"), "");
    }

    #[test]
    fn registry_lists_all_templates() {
        let templates = registry();
        for name in [
            RFKILL_SERVICE,
            BLUEZ_SERVICE,
            UPOWER_SERVICE,
            POWER_PROFILES_SERVICE,
            LOGIND_SERVICE,
        ] {
            assert!(templates.contains_key(name), "missing template {name}");
        }
    }
}
