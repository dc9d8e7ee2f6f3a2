//! Bluetooth panel scenario: default adapter plug/unplug, kill switches,
//! and airplane mode, with a stable set of paired devices that survives
//! adapter round-trips.

use std::collections::BTreeMap;

use anyhow::Result;

use crate::mock::templates::{
    default_adapter_props, device_object, paired_device_props, ADAPTER_OBJECT, AIRPLANE_MODE,
    BLOCKED, BLUEZ_SERVICE, BT_AIRPLANE_MODE, BT_HARDWARE_AIRPLANE_MODE, BT_HAS_AIRPLANE_MODE,
    POWERED, RFKILL_IFACE, RFKILL_SERVICE,
};
use crate::mock::property::PropValue;
use crate::mock::MockServiceOrchestrator;
use crate::scenario::Scenario;

/// A paired peripheral that reappears with the adapter.
#[derive(Debug, Clone)]
pub struct BtDevice {
    pub address: String,
    pub name: String,
    pub class: u32,
    pub icon: String,
}

/// Default paired set: one pointer, one keyboard.
#[must_use]
pub fn default_paired_devices() -> Vec<BtDevice> {
    vec![
        BtDevice {
            address: "22:33:44:55:66:77".to_string(),
            name: "Travel Mouse".to_string(),
            class: 0x580,
            icon: "input-mouse".to_string(),
        },
        BtDevice {
            address: "22:33:44:55:66:78".to_string(),
            name: "Slim Keyboard".to_string(),
            class: 0x540,
            icon: "input-keyboard".to_string(),
        },
    ]
}

/// Start the mock services this scenario drives: bluez first so the rfkill
/// cascade finds its peer.
pub fn start_services(orch: &mut MockServiceOrchestrator) -> Result<()> {
    orch.start(BLUEZ_SERVICE, "bluez", &BTreeMap::new())?;
    orch.start(RFKILL_SERVICE, "rfkill", &BTreeMap::new())?;
    Ok(())
}

pub struct BluetoothScenario<'a> {
    orch: &'a mut MockServiceOrchestrator,
    /// Power state the adapter comes back with after a replug.
    default_powered: bool,
    plugged_in: bool,
    paired: Vec<BtDevice>,
}

impl<'a> BluetoothScenario<'a> {
    /// Scenario over already-started services, with the default adapter
    /// plugged in. The template's bare adapter is rebuilt with the paired
    /// device set attached.
    pub fn new(orch: &'a mut MockServiceOrchestrator) -> Result<Self> {
        let mut scenario = Self {
            orch,
            default_powered: true,
            plugged_in: true,
            paired: default_paired_devices(),
        };
        scenario.orch.remove_object(BLUEZ_SERVICE, ADAPTER_OBJECT);
        scenario.add_adapter()?;
        Ok(scenario)
    }

    #[must_use]
    pub fn adapter_present(&self) -> bool {
        self.orch.adapter_state().present
    }

    /// Addresses of the currently enumerable paired devices, sorted.
    #[must_use]
    pub fn enumerable_devices(&self) -> Vec<String> {
        self.orch
            .objects(BLUEZ_SERVICE)
            .into_iter()
            .filter_map(|object| {
                object
                    .strip_prefix("org.bluez.Device1:")
                    .map(ToString::to_string)
            })
            .collect()
    }

    /// Plug the default adapter (no-op when present): the adapter object,
    /// its paired devices, and the has-airplane-mode hint all come back.
    pub fn add_adapter(&mut self) -> Result<()> {
        if self.adapter_present() {
            return Ok(());
        }
        let mut props = default_adapter_props();
        props.insert(POWERED.to_string(), PropValue::Bool(self.default_powered));
        props.insert(BLOCKED.to_string(), PropValue::Bool(!self.default_powered));
        self.orch
            .register_object(BLUEZ_SERVICE, ADAPTER_OBJECT, props)?;
        for device in self.paired.clone() {
            self.orch.register_object(
                BLUEZ_SERVICE,
                &device_object(&device.address),
                paired_device_props(&device.address, &device.name, device.class, &device.icon),
            )?;
        }
        self.orch.set_property(
            RFKILL_SERVICE,
            RFKILL_IFACE,
            BT_HAS_AIRPLANE_MODE,
            true.into(),
        )?;
        Ok(())
    }

    /// Unplug the adapter (no-op when absent). Devices disappear with it;
    /// with no hardware kill switch asserted the airplane-mode hint is
    /// withdrawn too.
    pub fn remove_adapter(&mut self) -> Result<()> {
        if !self.adapter_present() {
            return Ok(());
        }
        for device in self.paired.clone() {
            self.orch
                .remove_object(BLUEZ_SERVICE, &device_object(&device.address));
        }
        self.orch.remove_object(BLUEZ_SERVICE, ADAPTER_OBJECT);
        let hw_blocked = self
            .orch
            .get_property(RFKILL_SERVICE, RFKILL_IFACE, BT_HARDWARE_AIRPLANE_MODE)
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if !hw_blocked {
            self.orch.set_property(
                RFKILL_SERVICE,
                RFKILL_IFACE,
                BT_HAS_AIRPLANE_MODE,
                false.into(),
            )?;
        }
        Ok(())
    }

    /// Flip the hardware kill switch; the adapter drops off the bus while
    /// the switch is on and reappears when it is released.
    pub fn toggle_hw_rfkill(&mut self) -> Result<()> {
        let engaged = self
            .orch
            .get_property(RFKILL_SERVICE, RFKILL_IFACE, BT_HARDWARE_AIRPLANE_MODE)
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if engaged {
            self.orch.set_property(
                RFKILL_SERVICE,
                RFKILL_IFACE,
                BT_HARDWARE_AIRPLANE_MODE,
                false.into(),
            )?;
            if self.plugged_in {
                self.add_adapter()?;
            }
        } else {
            self.orch.set_property(
                RFKILL_SERVICE,
                RFKILL_IFACE,
                BT_HARDWARE_AIRPLANE_MODE,
                true.into(),
            )?;
            self.remove_adapter()?;
        }
        Ok(())
    }

    /// Flip the power state the adapter will default to on its next plug.
    pub fn toggle_default_powered(&mut self) {
        self.default_powered = !self.default_powered;
        println!(
            "default adapter will now come up {}",
            if self.default_powered {
                "powered"
            } else {
                "unpowered"
            }
        );
    }

    /// Plug or unplug the default adapter.
    pub fn toggle_plugged(&mut self) -> Result<()> {
        if self.plugged_in {
            self.plugged_in = false;
            println!("default adapter is unplugged");
            self.remove_adapter()
        } else {
            self.plugged_in = true;
            println!("default adapter is plugged in");
            self.add_adapter()
        }
    }

    /// Flip airplane mode: both the global and the bluetooth software
    /// flags move together, and the cascade drives the adapter state.
    pub fn toggle_airplane_mode(&mut self) -> Result<()> {
        let engaged = self
            .orch
            .get_property(RFKILL_SERVICE, RFKILL_IFACE, AIRPLANE_MODE)
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let next = !engaged;
        self.orch
            .set_property(RFKILL_SERVICE, RFKILL_IFACE, AIRPLANE_MODE, next.into())?;
        self.orch
            .set_property(RFKILL_SERVICE, RFKILL_IFACE, BT_AIRPLANE_MODE, next.into())?;
        Ok(())
    }
}

impl Scenario for BluetoothScenario<'_> {
    fn title(&self) -> &str {
        "Bluetooth Panel"
    }

    fn actions(&self) -> Vec<String> {
        vec![
            "Toggle Bluetooth hardware rfkill".to_string(),
            "Toggle default adapter unpowered".to_string(),
            "Unplug/plug default adapter".to_string(),
            "Toggle airplane mode".to_string(),
        ]
    }

    fn invoke(&mut self, index: usize) -> Result<()> {
        match index {
            0 => self.toggle_hw_rfkill(),
            1 => {
                self.toggle_default_powered();
                Ok(())
            }
            2 => self.toggle_plugged(),
            3 => self.toggle_airplane_mode(),
            _ => anyhow::bail!("no such action"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SandboxEnv;
    use crate::mock::OrchestratorConfig;

    fn orchestrator() -> MockServiceOrchestrator {
        let mut orch =
            MockServiceOrchestrator::new(SandboxEnv::default(), OrchestratorConfig::default());
        start_services(&mut orch).unwrap();
        orch
    }

    #[test]
    fn adapter_and_devices_present_at_start() {
        let mut orch = orchestrator();
        let scenario = BluetoothScenario::new(&mut orch).unwrap();
        assert!(scenario.adapter_present());
        assert_eq!(scenario.enumerable_devices().len(), 2);
    }

    #[test]
    fn hw_kill_switch_round_trip_restores_same_paired_devices() {
        let mut orch = orchestrator();
        let mut scenario = BluetoothScenario::new(&mut orch).unwrap();
        let before = scenario.enumerable_devices();

        scenario.toggle_hw_rfkill().unwrap();
        assert!(!scenario.adapter_present(), "adapter must not be enumerable");
        assert!(scenario.enumerable_devices().is_empty());

        scenario.toggle_hw_rfkill().unwrap();
        assert!(scenario.adapter_present());
        assert_eq!(scenario.enumerable_devices(), before);
    }

    #[test]
    fn airplane_mode_cascades_into_adapter() {
        let mut orch = orchestrator();
        let mut scenario = BluetoothScenario::new(&mut orch).unwrap();
        scenario.toggle_airplane_mode().unwrap();

        let adapter = scenario.orch.adapter_state();
        assert!(adapter.present);
        assert!(adapter.blocked);
        assert!(!adapter.powered);

        scenario.toggle_airplane_mode().unwrap();
        let adapter = scenario.orch.adapter_state();
        assert!(!adapter.blocked);
        assert!(!adapter.powered, "powered waits for an explicit restore");
    }

    #[test]
    fn unplugged_adapter_reads_absent_while_flags_still_record() {
        let mut orch = orchestrator();
        let mut scenario = BluetoothScenario::new(&mut orch).unwrap();
        scenario.toggle_plugged().unwrap();
        assert!(!scenario.adapter_present());

        // Flag writes are recorded with no peer side effect.
        scenario.toggle_airplane_mode().unwrap();
        assert!(!scenario.adapter_present());
        assert_eq!(
            scenario
                .orch
                .get_property(RFKILL_SERVICE, RFKILL_IFACE, BT_AIRPLANE_MODE),
            Some(PropValue::Bool(true))
        );
    }

    #[test]
    fn replug_honors_default_power_preference() {
        let mut orch = orchestrator();
        let mut scenario = BluetoothScenario::new(&mut orch).unwrap();
        scenario.toggle_default_powered();
        scenario.toggle_plugged().unwrap();
        scenario.toggle_plugged().unwrap();

        let adapter = scenario.orch.adapter_state();
        assert!(adapter.present);
        assert!(!adapter.powered);
        assert!(adapter.blocked);
    }

    #[test]
    fn has_airplane_mode_follows_adapter_and_hw_switch() {
        let mut orch = orchestrator();
        let mut scenario = BluetoothScenario::new(&mut orch).unwrap();
        let read = |scenario: &BluetoothScenario<'_>| {
            scenario
                .orch
                .get_property(RFKILL_SERVICE, RFKILL_IFACE, BT_HAS_AIRPLANE_MODE)
                .and_then(|v| v.as_bool())
                .unwrap()
        };
        assert!(read(&scenario));
        scenario.toggle_plugged().unwrap();
        assert!(!read(&scenario), "no adapter and no hw switch: hint withdrawn");
        scenario.toggle_plugged().unwrap();
        assert!(read(&scenario));
    }
}
