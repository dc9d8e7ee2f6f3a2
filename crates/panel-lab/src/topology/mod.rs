//! Simulated hardware topology: a parent/child graph of device nodes
//! observed by whichever mock layer exposes hardware enumeration.
//!
//! Pure graph structure — it never talks to mock services. Invariants: a
//! child's parent must already exist when the child is added; removal
//! cascades to all descendants, deepest first, each emitting a removal
//! event before the node itself goes away.

pub mod kinds;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Errors from topology construction. All indicate a scenario bug.
#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    /// Child added before its parent.
    #[error("parent `{parent}` does not exist for device `{path}`")]
    ParentMissing { path: String, parent: String },

    /// A node with this path is already registered.
    #[error("device path `{path}` already exists")]
    DuplicatePath { path: String },

    /// Operation on a path that is not in the topology.
    #[error("unknown device `{path}`")]
    UnknownNode { path: String },
}

/// Event kinds delivered to topology observers, mirroring kernel uevents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceEvent {
    Added,
    Removed,
    Changed,
}

impl fmt::Display for DeviceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Added => "add",
            Self::Removed => "remove",
            Self::Changed => "change",
        };
        write!(f, "{s}")
    }
}

/// One simulated hardware node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceNode {
    /// Topology-unique path, e.g. `/devices/platform/BAT0`.
    pub path: String,
    /// Subsystem tag: `power_supply`, `input`, `hid`, `usb`, `bluetooth`.
    pub subsystem: String,
    /// Parent path; `None` for root devices.
    pub parent: Option<String>,
    /// Static attributes (type, capacities, model/serial strings).
    pub attrs: BTreeMap<String, String>,
    /// Runtime/environment attributes (device-node name, capability flags).
    pub env: BTreeMap<String, String>,
}

impl DeviceNode {
    /// Read an attribute, static map first, then runtime map. Consumers do
    /// not distinguish the origin.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attrs
            .get(key)
            .or_else(|| self.env.get(key))
            .map(String::as_str)
    }
}

/// Observer seam for the mock hardware-enumeration provider.
pub trait TopologyObserver {
    fn on_event(&mut self, node: &DeviceNode, event: DeviceEvent);
}

/// The device graph for one sandbox.
#[derive(Default)]
pub struct DeviceTopology {
    nodes: BTreeMap<String, DeviceNode>,
    /// Child paths per parent, in insertion order.
    children: BTreeMap<String, Vec<String>>,
    observers: Vec<Box<dyn TopologyObserver>>,
}

impl DeviceTopology {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_observer(&mut self, observer: Box<dyn TopologyObserver>) {
        self.observers.push(observer);
    }

    /// Add a device. The parent, when given, must already exist.
    pub fn add_device(
        &mut self,
        subsystem: &str,
        path: &str,
        parent: Option<&str>,
        attrs: BTreeMap<String, String>,
        env: BTreeMap<String, String>,
    ) -> Result<&DeviceNode, TopologyError> {
        if self.nodes.contains_key(path) {
            return Err(TopologyError::DuplicatePath {
                path: path.to_string(),
            });
        }
        if let Some(parent) = parent {
            if !self.nodes.contains_key(parent) {
                return Err(TopologyError::ParentMissing {
                    path: path.to_string(),
                    parent: parent.to_string(),
                });
            }
        }
        let node = DeviceNode {
            path: path.to_string(),
            subsystem: subsystem.to_string(),
            parent: parent.map(ToString::to_string),
            attrs,
            env,
        };
        if let Some(parent) = parent {
            self.children
                .entry(parent.to_string())
                .or_default()
                .push(path.to_string());
        }
        self.nodes.insert(path.to_string(), node);
        debug!(path, subsystem, "device added");
        self.notify(path, DeviceEvent::Added);
        Ok(&self.nodes[path])
    }

    /// Remove a device and all of its descendants, deepest first. A removal
    /// event is emitted for every descendant before its node is dropped,
    /// then for the device itself, which is finally detached from its
    /// parent.
    pub fn remove_device(&mut self, path: &str) -> Result<(), TopologyError> {
        if !self.nodes.contains_key(path) {
            return Err(TopologyError::UnknownNode {
                path: path.to_string(),
            });
        }
        let order = self.removal_order(path);
        for victim in order {
            self.notify(&victim, DeviceEvent::Removed);
            if let Some(node) = self.nodes.remove(&victim) {
                if let Some(parent) = node.parent {
                    if let Some(siblings) = self.children.get_mut(&parent) {
                        siblings.retain(|p| p != &victim);
                    }
                }
            }
            self.children.remove(&victim);
            debug!(path = %victim, "device removed");
        }
        Ok(())
    }

    /// Post-order walk: every descendant before its ancestor.
    fn removal_order(&self, path: &str) -> Vec<String> {
        let mut order = Vec::new();
        self.post_order(path, &mut order);
        order
    }

    fn post_order(&self, path: &str, out: &mut Vec<String>) {
        if let Some(children) = self.children.get(path) {
            for child in children {
                self.post_order(child, out);
            }
        }
        out.push(path.to_string());
    }

    /// Inject a synthetic event (e.g. a `change` uevent after a battery
    /// attribute update) for an existing node.
    pub fn emit(&mut self, path: &str, event: DeviceEvent) -> Result<(), TopologyError> {
        if !self.nodes.contains_key(path) {
            return Err(TopologyError::UnknownNode {
                path: path.to_string(),
            });
        }
        self.notify(path, event);
        Ok(())
    }

    fn notify(&mut self, path: &str, event: DeviceEvent) {
        if let Some(node) = self.nodes.get(path) {
            let node = node.clone();
            for observer in &mut self.observers {
                observer.on_event(&node, event);
            }
        }
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<&DeviceNode> {
        self.nodes.get(path)
    }

    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.nodes.contains_key(path)
    }

    /// All node paths, sorted.
    #[must_use]
    pub fn paths(&self) -> Vec<&str> {
        self.nodes.keys().map(String::as_str).collect()
    }

    /// Direct children of a node, in insertion order.
    #[must_use]
    pub fn children_of(&self, path: &str) -> Vec<&str> {
        self.children
            .get(path)
            .map(|c| c.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }
}
