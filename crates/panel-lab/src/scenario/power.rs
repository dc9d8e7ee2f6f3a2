//! Power panel scenario: plug and unplug simulated power-supply hardware
//! and drive the power-profiles mock.

use std::collections::BTreeMap;

use anyhow::Result;

use crate::mock::property::PropValue;
use crate::mock::templates::{
    next_degraded, LOGIND_SERVICE, POWER_PROFILES_IFACE, POWER_PROFILES_SERVICE, UPOWER_IFACE,
    UPOWER_SERVICE,
};
use crate::mock::MockServiceOrchestrator;
use crate::scenario::Scenario;
use crate::topology::kinds::{add_kind, DeviceKind};
use crate::topology::DeviceTopology;

/// Start the mock services the power panel talks to.
pub fn start_services(orch: &mut MockServiceOrchestrator) -> Result<()> {
    orch.start(UPOWER_SERVICE, "upower", &BTreeMap::new())?;
    orch.start(POWER_PROFILES_SERVICE, "power-profiles", &BTreeMap::new())?;
    orch.start(LOGIND_SERVICE, "logind", &BTreeMap::new())?;
    Ok(())
}

pub struct PowerScenario<'a> {
    orch: &'a mut MockServiceOrchestrator,
    topology: &'a mut DeviceTopology,
    /// Created node paths per plugged kind, in insertion order.
    present: BTreeMap<DeviceKind, Vec<String>>,
}

impl<'a> PowerScenario<'a> {
    pub fn new(orch: &'a mut MockServiceOrchestrator, topology: &'a mut DeviceTopology) -> Self {
        Self {
            orch,
            topology,
            present: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn is_plugged(&self, kind: DeviceKind) -> bool {
        self.present.contains_key(&kind)
    }

    /// Plug or unplug one device kind. Unplugging removes the created
    /// nodes in reverse insertion order, children before parents.
    pub fn toggle_kind(&mut self, kind: DeviceKind) -> Result<()> {
        if let Some(paths) = self.present.remove(&kind) {
            for path in paths.iter().rev() {
                self.topology.remove_device(path)?;
            }
            println!("{kind}: removed");
        } else {
            let paths = add_kind(self.topology, kind)?;
            self.present.insert(kind, paths);
            println!("{kind}: added");
        }
        Ok(())
    }

    /// Plug or unplug the AC/battery pair a laptop power panel expects as
    /// its baseline; on-battery tracks whether mains is present.
    pub fn toggle_mains_and_battery(&mut self) -> Result<()> {
        let plugged = self.is_plugged(DeviceKind::Mains);
        self.toggle_kind(DeviceKind::Mains)?;
        if self.is_plugged(DeviceKind::Battery) == plugged {
            self.toggle_kind(DeviceKind::Battery)?;
        }
        self.orch.set_property(
            UPOWER_SERVICE,
            UPOWER_IFACE,
            "OnBattery",
            PropValue::Bool(!plugged),
        )?;
        Ok(())
    }

    /// Step the power-profiles degraded reason through its enumeration.
    pub fn cycle_degraded(&mut self) -> Result<()> {
        let current = self
            .orch
            .get_property(
                POWER_PROFILES_SERVICE,
                POWER_PROFILES_IFACE,
                "PerformanceDegraded",
            )
            .and_then(|v| v.as_str().map(ToString::to_string))
            .unwrap_or_default();
        let next = next_degraded(&current);
        self.orch.set_property(
            POWER_PROFILES_SERVICE,
            POWER_PROFILES_IFACE,
            "PerformanceDegraded",
            PropValue::Str(next.to_string()),
        )?;
        println!("performance degraded: {next:?}");
        Ok(())
    }

    /// Flip the upower lid state.
    pub fn toggle_lid(&mut self) -> Result<()> {
        let closed = self
            .orch
            .get_property(UPOWER_SERVICE, UPOWER_IFACE, "LidIsClosed")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        self.orch.set_property(
            UPOWER_SERVICE,
            UPOWER_IFACE,
            "LidIsClosed",
            PropValue::Bool(!closed),
        )?;
        Ok(())
    }
}

impl Scenario for PowerScenario<'_> {
    fn title(&self) -> &str {
        "Power Panel"
    }

    fn actions(&self) -> Vec<String> {
        vec![
            "Add/remove AC and main battery".to_string(),
            "Add/remove second battery".to_string(),
            "Add/remove bluetooth keyboard".to_string(),
            "Add/remove USB mouse".to_string(),
            "Add/remove UPS".to_string(),
            "Cycle performance-degraded reason".to_string(),
            "Open/close lid".to_string(),
        ]
    }

    fn invoke(&mut self, index: usize) -> Result<()> {
        match index {
            0 => self.toggle_mains_and_battery(),
            1 => self.toggle_kind(DeviceKind::SecondBattery),
            2 => self.toggle_kind(DeviceKind::Keyboard),
            3 => self.toggle_kind(DeviceKind::Mouse),
            4 => self.toggle_kind(DeviceKind::Ups),
            5 => self.cycle_degraded(),
            6 => self.toggle_lid(),
            _ => anyhow::bail!("no such action"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SandboxEnv;
    use crate::mock::OrchestratorConfig;

    fn fixtures() -> (MockServiceOrchestrator, DeviceTopology) {
        let mut orch =
            MockServiceOrchestrator::new(SandboxEnv::default(), OrchestratorConfig::default());
        start_services(&mut orch).unwrap();
        (orch, DeviceTopology::new())
    }

    #[test]
    fn keyboard_toggle_round_trip_leaves_no_nodes() {
        let (mut orch, mut topo) = fixtures();
        let mut scenario = PowerScenario::new(&mut orch, &mut topo);
        scenario.toggle_kind(DeviceKind::Keyboard).unwrap();
        assert!(scenario.is_plugged(DeviceKind::Keyboard));
        assert_eq!(scenario.topology.paths().len(), 3);

        scenario.toggle_kind(DeviceKind::Keyboard).unwrap();
        assert!(!scenario.is_plugged(DeviceKind::Keyboard));
        assert!(scenario.topology.paths().is_empty());
    }

    #[test]
    fn mains_and_battery_move_together_and_drive_on_battery() {
        let (mut orch, mut topo) = fixtures();
        let mut scenario = PowerScenario::new(&mut orch, &mut topo);
        scenario.toggle_mains_and_battery().unwrap();
        assert!(scenario.is_plugged(DeviceKind::Mains));
        assert!(scenario.is_plugged(DeviceKind::Battery));
        assert_eq!(
            scenario
                .orch
                .get_property(UPOWER_SERVICE, UPOWER_IFACE, "OnBattery"),
            Some(PropValue::Bool(true))
        );

        scenario.toggle_mains_and_battery().unwrap();
        assert!(!scenario.is_plugged(DeviceKind::Mains));
        assert!(!scenario.is_plugged(DeviceKind::Battery));
        assert_eq!(
            scenario
                .orch
                .get_property(UPOWER_SERVICE, UPOWER_IFACE, "OnBattery"),
            Some(PropValue::Bool(false))
        );
    }

    #[test]
    fn degraded_cycles_through_known_reasons_and_wraps() {
        let (mut orch, mut topo) = fixtures();
        let mut scenario = PowerScenario::new(&mut orch, &mut topo);
        let read = |scenario: &PowerScenario<'_>| {
            scenario
                .orch
                .get_property(
                    POWER_PROFILES_SERVICE,
                    POWER_PROFILES_IFACE,
                    "PerformanceDegraded",
                )
                .and_then(|v| v.as_str().map(ToString::to_string))
                .unwrap()
        };
        scenario.cycle_degraded().unwrap();
        assert_eq!(read(&scenario), "lap-detected");
        scenario.cycle_degraded().unwrap();
        assert_eq!(read(&scenario), "high-operating-temperature");
        scenario.cycle_degraded().unwrap();
        assert_eq!(read(&scenario), "");
    }

    #[test]
    fn every_menu_action_is_invokable() {
        let (mut orch, mut topo) = fixtures();
        let mut scenario = PowerScenario::new(&mut orch, &mut topo);
        let count = scenario.actions().len();
        for index in 0..count {
            scenario.invoke(index).unwrap();
        }
        assert!(scenario.invoke(count).is_err());
    }

    #[test]
    fn lid_toggle_flips_state() {
        let (mut orch, mut topo) = fixtures();
        let mut scenario = PowerScenario::new(&mut orch, &mut topo);
        scenario.toggle_lid().unwrap();
        assert_eq!(
            scenario
                .orch
                .get_property(UPOWER_SERVICE, UPOWER_IFACE, "LidIsClosed"),
            Some(PropValue::Bool(true))
        );
    }
}
