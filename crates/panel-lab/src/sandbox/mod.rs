//! Sandbox assembly: isolated display + private buses + mock services +
//! device topology for one test run.
//!
//! Acquisition order is display, buses, services; teardown is strictly the
//! reverse and runs exactly once, blocking until every child process has
//! exited. A sandbox that fails part-way through `start` tears down
//! whatever had already come up before returning the error.

pub mod bus;
pub mod display;

use tracing::info;

use crate::config::SandboxEnv;
use crate::mock::{MockServiceOrchestrator, OrchestratorConfig, OrchestratorError};
use crate::topology::DeviceTopology;
use bus::{BusConfig, BusError, BusIsolationManager};
use display::{DisplayConfig, DisplayHandle, DisplayProvisioner, ProvisionError};

/// Sandbox-fatal errors: resource acquisition failed.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("display provisioning failed")]
    Provision(#[from] ProvisionError),

    #[error("bus isolation failed")]
    Bus(#[from] BusError),

    #[error("mock service orchestration failed")]
    Orchestrator(#[from] OrchestratorError),
}

/// Aggregate configuration for one sandbox.
#[derive(Debug, Clone, Default)]
pub struct SandboxConfig {
    pub display: DisplayConfig,
    pub bus: BusConfig,
    pub orchestrator: OrchestratorConfig,
}

/// One isolated display + bus environment with its mock services and
/// simulated hardware.
pub struct Sandbox {
    env: SandboxEnv,
    provisioner: DisplayProvisioner,
    display: DisplayHandle,
    buses: BusIsolationManager,
    orchestrator: MockServiceOrchestrator,
    topology: DeviceTopology,
    torn_down: bool,
}

impl Sandbox {
    /// Provision display and buses, then stand up the orchestrator against
    /// the resulting environment.
    pub fn start(config: SandboxConfig) -> Result<Self, SandboxError> {
        let provisioner = DisplayProvisioner::new(config.display);
        let mut display = provisioner.acquire()?;

        let mut buses = BusIsolationManager::new(config.bus);
        let addresses = match buses.start() {
            Ok(addresses) => addresses,
            Err(err) => {
                provisioner.release(&mut display);
                return Err(err.into());
            }
        };

        let mut env = SandboxEnv::with_memory_backend().wrapper_from_env();
        env.display = Some(display.display());
        env.system_bus_address = Some(addresses.system);
        env.session_bus_address = Some(addresses.session);

        let orchestrator = MockServiceOrchestrator::new(env.clone(), config.orchestrator);
        let display_number = display.number();
        info!(display_number, "sandbox up");

        Ok(Self {
            env,
            provisioner,
            display,
            buses,
            orchestrator,
            topology: DeviceTopology::new(),
            torn_down: false,
        })
    }

    #[must_use]
    pub fn env(&self) -> &SandboxEnv {
        &self.env
    }

    #[must_use]
    pub fn display_number(&self) -> u32 {
        self.display.number()
    }

    #[must_use]
    pub fn orchestrator(&self) -> &MockServiceOrchestrator {
        &self.orchestrator
    }

    pub fn orchestrator_mut(&mut self) -> &mut MockServiceOrchestrator {
        &mut self.orchestrator
    }

    #[must_use]
    pub fn topology(&self) -> &DeviceTopology {
        &self.topology
    }

    pub fn topology_mut(&mut self) -> &mut DeviceTopology {
        &mut self.topology
    }

    /// Mutable access to the orchestrator and topology at once, for
    /// scenarios that drive both.
    pub fn split_mut(&mut self) -> (&mut MockServiceOrchestrator, &mut DeviceTopology) {
        (&mut self.orchestrator, &mut self.topology)
    }

    /// Tear everything down in reverse acquisition order: services, buses,
    /// display. Idempotent; also runs on drop.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.orchestrator.stop_all();
        self.buses.stop();
        self.provisioner.release(&mut self.display);
        self.torn_down = true;
        info!("sandbox torn down");
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        self.teardown();
    }
}
