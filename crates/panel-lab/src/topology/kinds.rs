//! Canned device kinds with fixed attribute templates.
//!
//! Each kind expands to one or more nodes; multi-node kinds preserve the
//! parent/child relations consumers use to resolve device capabilities
//! (e.g. a peripheral battery hangs off the radio node, so power panels
//! attribute it to the peripheral, not the laptop).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::topology::{DeviceTopology, TopologyError};

/// Named device kinds the scenarios toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    /// Primary laptop battery (BAT0), discharging.
    Battery,
    /// Secondary battery (BAT1), not charging, no cycle count.
    SecondBattery,
    /// Mains power supply (AC), offline.
    Mains,
    /// Bluetooth keyboard: radio node, input child, sub-battery child.
    Keyboard,
    /// USB HID mouse: hid node, input child, sub-battery child.
    Mouse,
    /// Uninterruptible power supply pseudo-device.
    Ups,
}

impl DeviceKind {
    pub fn all() -> &'static [DeviceKind] {
        &[
            Self::Battery,
            Self::SecondBattery,
            Self::Mains,
            Self::Keyboard,
            Self::Mouse,
            Self::Ups,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Battery => "battery",
            Self::SecondBattery => "2nd-battery",
            Self::Mains => "ac",
            Self::Keyboard => "keyboard",
            Self::Mouse => "mouse",
            Self::Ups => "ups",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Expand a kind into the topology. Returns the created paths in insertion
/// order (parents first), so callers can remove them in reverse.
pub fn add_kind(
    topology: &mut DeviceTopology,
    kind: DeviceKind,
) -> Result<Vec<String>, TopologyError> {
    let mut created = Vec::new();
    match kind {
        DeviceKind::Battery => {
            topology.add_device(
                "power_supply",
                "/devices/platform/BAT0",
                None,
                map(&[
                    ("type", "Battery"),
                    ("present", "1"),
                    ("status", "Discharging"),
                    ("energy_full", "60000000"),
                    ("energy_full_design", "80000000"),
                    ("energy_now", "48000000"),
                    ("voltage_now", "12000000"),
                    ("cycle_count", "250"),
                ]),
                map(&[]),
            )?;
            created.push("/devices/platform/BAT0".to_string());
        }
        DeviceKind::SecondBattery => {
            topology.add_device(
                "power_supply",
                "/devices/platform/BAT1",
                None,
                map(&[
                    ("type", "Battery"),
                    ("present", "1"),
                    ("status", "Not charging"),
                    ("energy_full", "30000000"),
                    ("energy_full_design", "40000000"),
                    ("energy_now", "20000000"),
                    ("voltage_now", "12000000"),
                    ("cycle_count", "-1"),
                ]),
                map(&[]),
            )?;
            created.push("/devices/platform/BAT1".to_string());
        }
        DeviceKind::Mains => {
            topology.add_device(
                "power_supply",
                "/devices/platform/AC",
                None,
                map(&[("type", "Mains"), ("online", "0")]),
                map(&[]),
            )?;
            created.push("/devices/platform/AC".to_string());
        }
        DeviceKind::Keyboard => {
            let radio = "/devices/usb2/bluetooth/hci0/hci0:1";
            topology.add_device("bluetooth", radio, None, map(&[]), map(&[]))?;
            created.push(radio.to_string());

            let input = "/devices/usb2/bluetooth/hci0/hci0:1/input3/event4";
            topology.add_device(
                "input",
                input,
                Some(radio),
                map(&[]),
                map(&[("DEVNAME", "input/event4"), ("ID_INPUT_KEYBOARD", "1")]),
            )?;
            created.push(input.to_string());

            let batt = "/devices/usb2/bluetooth/hci0/hci0:1/power_supply/hid-00:22:33:44:55:66-battery";
            topology.add_device(
                "power_supply",
                batt,
                Some(radio),
                map(&[
                    ("type", "Battery"),
                    ("scope", "Device"),
                    ("present", "1"),
                    ("online", "1"),
                    ("status", "Discharging"),
                    ("capacity", "40"),
                    ("model_name", "Monster Typist"),
                ]),
                map(&[]),
            )?;
            created.push(batt.to_string());
        }
        DeviceKind::Mouse => {
            let hid = "/devices/pci0000:00/0000:00:14.0/usb3/3-10/3-10:1.2/0003:046D:4101.000A";
            topology.add_device("hid", hid, None, map(&[]), map(&[]))?;
            created.push(hid.to_string());

            let input = format!("{hid}/input/input22");
            topology.add_device(
                "input",
                &input,
                Some(hid),
                map(&[]),
                map(&[("DEVNAME", "input/mouse3"), ("ID_INPUT_MOUSE", "1")]),
            )?;
            created.push(input);

            let batt = format!("{hid}/power_supply/hidpp_battery_3");
            topology.add_device(
                "power_supply",
                &batt,
                Some(hid),
                map(&[
                    ("type", "Battery"),
                    ("scope", "Device"),
                    ("present", "1"),
                    ("online", "1"),
                    ("status", "Discharging"),
                    ("capacity", "30"),
                    ("serial_number", "123456"),
                    ("model_name", "Fancy Mouse"),
                ]),
                map(&[]),
            )?;
            created.push(batt);
        }
        DeviceKind::Ups => {
            topology.add_device(
                "usb",
                "/devices/usb1/hiddev0",
                None,
                map(&[]),
                map(&[
                    ("DEVNAME", "null"),
                    ("UPOWER_VENDOR", "APC"),
                    ("UPOWER_BATTERY_TYPE", "ups"),
                    ("UPOWER_FAKE_DEVICE", "1"),
                    ("UPOWER_FAKE_HID_CHARGING", "0"),
                    ("UPOWER_FAKE_HID_PERCENTAGE", "70"),
                ]),
            )?;
            created.push("/devices/usb1/hiddev0".to_string());
        }
    }
    Ok(created)
}
