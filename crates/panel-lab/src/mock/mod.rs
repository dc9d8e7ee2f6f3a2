//! Mock-service orchestration: ordered startup, reactive property writes,
//! and guaranteed reverse-order teardown.
//!
//! Services are started by name from a [`templates`] descriptor. The
//! orchestrator owns the authoritative property tables
//! ([`reaction::ServiceStateStore`]); the spawned per-service server process
//! is the bus-facing black box, reached only through the [`PropertySink`] /
//! [`ServiceProbe`] seams so the transport stays out of the core.

pub mod property;
pub mod reaction;
pub mod templates;

use std::collections::BTreeMap;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::SandboxEnv;
use property::{Mutation, PropValue, PropertyChangeEvent};
use reaction::{ReactiveModel, ServiceStateStore};
use templates::{AdapterState, TemplateDescriptor};

/// Errors from mock-service orchestration.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// A service with this name is already registered and running.
    #[error("service `{name}` is already registered")]
    DuplicateService { name: String },

    /// No template with this name exists in the registry.
    #[error("unknown template `{template}`")]
    UnknownTemplate { template: String },

    /// The named service was never started in this sandbox.
    #[error("unknown service `{name}`")]
    UnknownService { name: String },

    /// A template parameter not listed in the descriptor was supplied.
    #[error("template `{template}` does not recognize parameter `{param}`")]
    UnknownParam { template: String, param: String },

    /// The spawned service process never became reachable.
    #[error("service `{name}` unreachable after {waited_ms}ms")]
    ServiceUnreachable { name: String, waited_ms: u64 },

    /// Spawning the service server process failed.
    #[error("failed to spawn server for service `{name}`")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Reachability probe over the IPC substrate. The default implementation
/// treats a live child process as reachable; a transport binding would ping
/// the service name on the isolated bus instead.
pub trait ServiceProbe {
    fn reachable(&self, name: &str, object_path: &str) -> bool;
}

/// Probe that always reports reachable.
pub struct AlwaysReachable;

impl ServiceProbe for AlwaysReachable {
    fn reachable(&self, _name: &str, _object_path: &str) -> bool {
        true
    }
}

/// Outbound half of the IPC seam: every property-change event produced by a
/// write or a cascade is published here for the bus-facing server to relay.
pub trait PropertySink {
    fn publish(&mut self, event: &PropertyChangeEvent);
}

/// Default sink: structured log only.
pub struct LoggingSink;

impl PropertySink for LoggingSink {
    fn publish(&mut self, event: &PropertyChangeEvent) {
        debug!(
            service = %event.service,
            object = %event.interface,
            changed = ?event.changed,
            "property change"
        );
    }
}

/// Orchestrator tuning.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Argv prefix for the bus-facing server process, completed with the
    /// service name and object path. `None` keeps the service in-process
    /// (no child is spawned), which is what unit tests use.
    pub server_command: Option<Vec<String>>,

    /// How long to wait for a spawned service to become reachable.
    pub startup_timeout: Duration,

    /// Poll interval while waiting for reachability.
    pub poll_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            server_command: None,
            startup_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// One started mock service.
#[derive(Debug)]
pub struct ServiceHandle {
    pub name: String,
    pub template: String,
    pub object_path: String,
    child: Option<Child>,
    stopped: bool,
}

impl ServiceHandle {
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

/// Starts, mutates, and tears down mock services in deterministic order.
pub struct MockServiceOrchestrator {
    env: SandboxEnv,
    config: OrchestratorConfig,
    templates: BTreeMap<&'static str, TemplateDescriptor>,
    store: ServiceStateStore,
    model: ReactiveModel,
    services: Vec<ServiceHandle>,
    stop_sequence: Vec<String>,
    probe: Box<dyn ServiceProbe>,
    sink: Box<dyn PropertySink>,
}

impl MockServiceOrchestrator {
    #[must_use]
    pub fn new(env: SandboxEnv, config: OrchestratorConfig) -> Self {
        Self {
            env,
            config,
            templates: templates::registry(),
            store: ServiceStateStore::new(),
            model: ReactiveModel::new(),
            services: Vec::new(),
            stop_sequence: Vec::new(),
            probe: Box::new(AlwaysReachable),
            sink: Box::new(LoggingSink),
        }
    }

    #[must_use]
    pub fn with_probe(mut self, probe: Box<dyn ServiceProbe>) -> Self {
        self.probe = probe;
        self
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Box<dyn PropertySink>) -> Self {
        self.sink = sink;
        self
    }

    /// Start a service from a template with caller-supplied parameter
    /// overrides. Registration order is preserved for reverse teardown.
    pub fn start(
        &mut self,
        name: &str,
        template: &str,
        params: &BTreeMap<String, PropValue>,
    ) -> Result<&ServiceHandle, OrchestratorError> {
        if self.is_running(name) {
            return Err(OrchestratorError::DuplicateService {
                name: name.to_string(),
            });
        }
        let descriptor =
            self.templates
                .get(template)
                .ok_or_else(|| OrchestratorError::UnknownTemplate {
                    template: template.to_string(),
                })?;

        // Validate parameters before any state is touched.
        for param in params.keys() {
            if !descriptor.params.iter().any(|(p, _, _)| p == param) {
                return Err(OrchestratorError::UnknownParam {
                    template: template.to_string(),
                    param: param.clone(),
                });
            }
        }

        self.store.add_service(name);
        for (object, props) in (descriptor.defaults)() {
            self.store.insert_object(name, &object, props);
        }
        for (param, value) in params {
            let (_, object, key) = descriptor
                .params
                .iter()
                .find(|(p, _, _)| p == param)
                .copied()
                .unwrap_or_else(|| unreachable!("param validated above"));
            self.store
                .apply(&Mutation::new(name, object, key, value.clone()));
        }
        self.model.register_all((descriptor.rules)(name));

        let object_path = descriptor.object_path.to_string();
        let child = match self.spawn_server(name, &object_path) {
            Ok(child) => child,
            Err(err) => {
                self.store.remove_service(name);
                self.model.unregister_service(name);
                return Err(err);
            }
        };

        let mut handle = ServiceHandle {
            name: name.to_string(),
            template: template.to_string(),
            object_path,
            child,
            stopped: false,
        };

        if handle.child.is_some() {
            if let Err(err) = self.await_reachable(&mut handle) {
                self.store.remove_service(name);
                self.model.unregister_service(name);
                return Err(err);
            }
        }

        info!(service = name, template, "mock service started");
        self.services.push(handle);
        Ok(self.services.last().unwrap_or_else(|| unreachable!()))
    }

    fn spawn_server(
        &self,
        name: &str,
        object_path: &str,
    ) -> Result<Option<Child>, OrchestratorError> {
        let Some(argv) = &self.config.server_command else {
            return Ok(None);
        };
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| OrchestratorError::Spawn {
                name: name.to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "empty server command",
                ),
            })?;
        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg(name)
            .arg(object_path)
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        self.env.apply(&mut cmd);
        let child = cmd.spawn().map_err(|source| OrchestratorError::Spawn {
            name: name.to_string(),
            source,
        })?;
        Ok(Some(child))
    }

    fn await_reachable(&mut self, handle: &mut ServiceHandle) -> Result<(), OrchestratorError> {
        let started = Instant::now();
        loop {
            if let Some(child) = handle.child.as_mut() {
                // An early exit means the server crashed before serving.
                if let Ok(Some(status)) = child.try_wait() {
                    warn!(service = %handle.name, %status, "service server exited during startup");
                    return Err(OrchestratorError::ServiceUnreachable {
                        name: handle.name.clone(),
                        waited_ms: started.elapsed().as_millis() as u64,
                    });
                }
            }
            if self.probe.reachable(&handle.name, &handle.object_path) {
                return Ok(());
            }
            if started.elapsed() >= self.config.startup_timeout {
                if let Some(child) = handle.child.as_mut() {
                    let _ = child.kill();
                    let _ = child.wait();
                }
                return Err(OrchestratorError::ServiceUnreachable {
                    name: handle.name.clone(),
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            thread::sleep(self.config.poll_interval);
        }
    }

    #[must_use]
    pub fn is_running(&self, name: &str) -> bool {
        self.services
            .iter()
            .any(|svc| svc.name == name && !svc.stopped)
    }

    /// Names of all currently running services, in start order.
    #[must_use]
    pub fn running_services(&self) -> Vec<&str> {
        self.services
            .iter()
            .filter(|svc| !svc.stopped)
            .map(|svc| svc.name.as_str())
            .collect()
    }

    /// Read-only view of the live property tables.
    #[must_use]
    pub fn store(&self) -> &ServiceStateStore {
        &self.store
    }

    /// Derived radio-adapter view.
    #[must_use]
    pub fn adapter_state(&self) -> AdapterState {
        AdapterState::query(&self.store)
    }

    #[must_use]
    pub fn get_property(&self, service: &str, object: &str, key: &str) -> Option<PropValue> {
        use reaction::StoreView as _;
        self.store.get(service, object, key)
    }

    /// Write one property and run the full cascade before returning.
    ///
    /// Returns the triggering event followed by every derived event. A write
    /// targeting an object that is not registered is a recorded no-op.
    pub fn set_property(
        &mut self,
        service: &str,
        object: &str,
        key: &str,
        value: PropValue,
    ) -> Result<Vec<PropertyChangeEvent>, OrchestratorError> {
        if !self.store.has_service(service) {
            return Err(OrchestratorError::UnknownService {
                name: service.to_string(),
            });
        }
        let mutation = Mutation::new(service, object, key, value);
        let Some(event) = self.store.apply(&mutation) else {
            debug!(service, object, key, "write to absent object ignored");
            return Ok(Vec::new());
        };
        let mut events = vec![event.clone()];
        events.extend(self.model.cascade(&mut self.store, &event));
        for ev in &events {
            self.sink.publish(ev);
        }
        Ok(events)
    }

    /// Register an additional object (e.g. a plugged adapter or a paired
    /// device) on a running service.
    pub fn register_object(
        &mut self,
        service: &str,
        object: &str,
        props: BTreeMap<String, PropValue>,
    ) -> Result<(), OrchestratorError> {
        if !self.store.has_service(service) {
            return Err(OrchestratorError::UnknownService {
                name: service.to_string(),
            });
        }
        self.store.insert_object(service, object, props);
        Ok(())
    }

    /// Remove an object; dependent observers see it as not present.
    pub fn remove_object(&mut self, service: &str, object: &str) {
        self.store.remove_object(service, object);
    }

    /// Object keys currently registered on a service.
    #[must_use]
    pub fn objects(&self, service: &str) -> Vec<String> {
        self.store.objects(service)
    }

    /// Stop one service: kill and reap its server, drop its state and
    /// rules. Stopping an already-stopped service is a no-op.
    ///
    /// A name can appear more than once in the registry after a legal
    /// stop-then-restart; only the live (most recent) handle is stopped.
    pub fn stop(&mut self, name: &str) -> Result<(), OrchestratorError> {
        if !self.services.iter().any(|svc| svc.name == name) {
            return Err(OrchestratorError::UnknownService {
                name: name.to_string(),
            });
        }
        let Some(handle) = self
            .services
            .iter_mut()
            .rev()
            .find(|svc| svc.name == name && !svc.stopped)
        else {
            return Ok(());
        };
        if let Some(child) = handle.child.as_mut() {
            let _ = child.kill();
            let _ = child.wait();
        }
        handle.child = None;
        handle.stopped = true;
        self.store.remove_service(name);
        self.model.unregister_service(name);
        self.stop_sequence.push(name.to_string());
        info!(service = name, "mock service stopped");
        Ok(())
    }

    /// Stop every running service, strictly in reverse start order,
    /// blocking until each server has exited.
    pub fn stop_all(&mut self) {
        let names: Vec<String> = self
            .services
            .iter()
            .rev()
            .filter(|svc| !svc.stopped)
            .map(|svc| svc.name.clone())
            .collect();
        for name in names {
            let _ = self.stop(&name);
        }
    }

    /// Teardown order so far, for diagnostics.
    #[must_use]
    pub fn stop_sequence(&self) -> &[String] {
        &self.stop_sequence
    }
}

impl Drop for MockServiceOrchestrator {
    fn drop(&mut self) {
        self.stop_all();
    }
}
