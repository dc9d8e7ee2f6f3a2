//! Sandbox environment configuration threaded into every child spawn.
//!
//! The original harness mutated the process-wide environment before each
//! spawn; here the environment is an explicit struct constructed once per
//! sandbox and applied to each `Command`, so nothing ambient leaks between
//! concurrent sandboxes.

use std::collections::BTreeMap;
use std::process::Command;

use serde::{Deserialize, Serialize};

/// Environment variable carrying the isolated display identifier.
pub const DISPLAY_VAR: &str = "DISPLAY";
/// Environment variable carrying the private system bus address.
pub const SYSTEM_BUS_VAR: &str = "DBUS_SYSTEM_BUS_ADDRESS";
/// Environment variable carrying the private session bus address.
pub const SESSION_BUS_VAR: &str = "DBUS_SESSION_BUS_ADDRESS";
/// Environment variable selecting the settings backend for children.
pub const SETTINGS_BACKEND_VAR: &str = "GSETTINGS_BACKEND";
/// Environment variable an operator sets to wrap the panel invocation.
pub const WRAPPER_VAR: &str = "PANEL_LAB_WRAPPER";

/// Per-sandbox environment handed to every spawned child process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxEnv {
    /// Isolated display identifier, e.g. `:99`.
    pub display: Option<String>,

    /// Private system-scope bus address.
    pub system_bus_address: Option<String>,

    /// Private session-scope bus address.
    pub session_bus_address: Option<String>,

    /// Settings backend override; `memory` keeps panel settings volatile.
    pub settings_backend: Option<String>,

    /// Optional space-separated argv prefix (e.g. `gdb -ex r --args`).
    pub wrapper: Option<String>,

    /// Additional variables exported verbatim to children.
    pub extra: BTreeMap<String, String>,
}

impl SandboxEnv {
    /// Environment with the volatile settings backend preset.
    #[must_use]
    pub fn with_memory_backend() -> Self {
        Self {
            settings_backend: Some("memory".to_string()),
            ..Self::default()
        }
    }

    /// Read the operator wrapper from the calling environment.
    #[must_use]
    pub fn wrapper_from_env(mut self) -> Self {
        self.wrapper = std::env::var(WRAPPER_VAR).ok().filter(|w| !w.is_empty());
        self
    }

    /// Export this environment onto a child command.
    pub fn apply(&self, cmd: &mut Command) {
        if let Some(display) = &self.display {
            cmd.env(DISPLAY_VAR, display);
        }
        if let Some(addr) = &self.system_bus_address {
            cmd.env(SYSTEM_BUS_VAR, addr);
        }
        if let Some(addr) = &self.session_bus_address {
            cmd.env(SESSION_BUS_VAR, addr);
        }
        if let Some(backend) = &self.settings_backend {
            cmd.env(SETTINGS_BACKEND_VAR, backend);
        }
        for (key, value) in &self.extra {
            cmd.env(key, value);
        }
    }

    /// Prefix an argv with the operator wrapper, if one is configured.
    ///
    /// The wrapper string is split on spaces; `gdb` gets the conventional
    /// run-and-backtrace arguments appended so a crash leaves a trace.
    #[must_use]
    pub fn wrap_argv(&self, argv: &[String]) -> Vec<String> {
        match self.wrapper.as_deref() {
            None | Some("") => argv.to_vec(),
            Some("gdb") => {
                let mut wrapped: Vec<String> =
                    ["gdb", "-ex", "r", "-ex", "bt full", "--args"]
                        .iter()
                        .map(ToString::to_string)
                        .collect();
                wrapped.extend_from_slice(argv);
                wrapped
            }
            Some(wrapper) => {
                let mut wrapped: Vec<String> =
                    wrapper.split(' ').map(ToString::to_string).collect();
                wrapped.extend_from_slice(argv);
                wrapped
            }
        }
    }
}
