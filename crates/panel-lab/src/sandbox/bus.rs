//! Private message-bus provisioning.
//!
//! Starts two independent bus daemons — system scope and session scope —
//! from generated config files in a private work directory, so mock
//! services and the panel under test never observe the host's real
//! services. Addresses are read back from the daemon's stdout and published
//! into the sandbox environment.

use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info};
use uuid::Uuid;

/// Errors from bus provisioning. Fatal for the sandbox.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The bus daemon could not be spawned.
    #[error("failed to spawn bus daemon `{program}` for {scope} scope")]
    Spawn {
        program: String,
        scope: BusScope,
        #[source]
        source: std::io::Error,
    },

    /// The daemon exited or stayed silent before printing its address.
    #[error("{scope} bus daemon reported no address")]
    NoAddress { scope: BusScope },

    /// Work-directory bookkeeping failed.
    #[error("bus work directory I/O failure")]
    Io(#[from] std::io::Error),
}

/// Which of the two isolated buses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusScope {
    System,
    Session,
}

impl BusScope {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Session => "session",
        }
    }
}

impl std::fmt::Display for BusScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Addresses of both isolated buses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusAddresses {
    pub system: String,
    pub session: String,
}

/// Bus daemon invocation settings.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Daemon program, invoked as
    /// `<program> --config-file <path> --print-address=1 --nofork`.
    pub program: String,

    /// How long to wait for the daemon to print its address.
    pub startup_timeout: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            program: "dbus-daemon".to_string(),
            startup_timeout: Duration::from_secs(10),
        }
    }
}

struct BusDaemon {
    scope: BusScope,
    child: Child,
    address: String,
}

/// Starts and stops the pair of isolated bus daemons.
pub struct BusIsolationManager {
    config: BusConfig,
    workdir: Option<PathBuf>,
    system: Option<BusDaemon>,
    session: Option<BusDaemon>,
}

impl BusIsolationManager {
    #[must_use]
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            workdir: None,
            system: None,
            session: None,
        }
    }

    /// Start both buses, system scope first. On a partial failure the
    /// already-started daemon is stopped before the error is returned.
    pub fn start(&mut self) -> Result<BusAddresses, BusError> {
        if let Some(addresses) = self.addresses() {
            return Ok(addresses);
        }
        let workdir = std::env::temp_dir().join(format!("panel-lab-bus-{}", Uuid::now_v7()));
        std::fs::create_dir_all(&workdir)?;
        self.workdir = Some(workdir);

        match self.start_daemon(BusScope::System) {
            Ok(daemon) => self.system = Some(daemon),
            Err(err) => {
                self.stop();
                return Err(err);
            }
        }
        match self.start_daemon(BusScope::Session) {
            Ok(daemon) => self.session = Some(daemon),
            Err(err) => {
                self.stop();
                return Err(err);
            }
        }

        let addresses = self
            .addresses()
            .unwrap_or_else(|| unreachable!("both daemons just started"));
        info!(
            system = %addresses.system,
            session = %addresses.session,
            "isolated buses up"
        );
        Ok(addresses)
    }

    fn start_daemon(&self, scope: BusScope) -> Result<BusDaemon, BusError> {
        let workdir = self
            .workdir
            .as_ref()
            .unwrap_or_else(|| unreachable!("workdir created in start"));
        let conf_path = workdir.join(format!("{}.conf", scope.as_str()));
        std::fs::write(&conf_path, bus_config_xml(scope, workdir))?;

        let mut cmd = Command::new(&self.config.program);
        cmd.arg("--config-file")
            .arg(&conf_path)
            .arg("--print-address=1")
            .arg("--nofork")
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        let mut child = cmd.spawn().map_err(|source| BusError::Spawn {
            program: self.config.program.clone(),
            scope,
            source,
        })?;

        let stdout = child
            .stdout
            .take()
            .unwrap_or_else(|| unreachable!("stdout was piped"));
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut line = String::new();
            let read = BufReader::new(stdout).read_line(&mut line);
            let _ = tx.send(read.map(|n| (n, line)));
        });

        match rx.recv_timeout(self.config.startup_timeout) {
            Ok(Ok((n, line))) if n > 0 && !line.trim().is_empty() => {
                let address = line.trim().to_string();
                debug!(%scope, %address, "bus daemon up");
                Ok(BusDaemon {
                    scope,
                    child,
                    address,
                })
            }
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                Err(BusError::NoAddress { scope })
            }
        }
    }

    /// Addresses of both buses, once both are running.
    #[must_use]
    pub fn addresses(&self) -> Option<BusAddresses> {
        Some(BusAddresses {
            system: self.system.as_ref()?.address.clone(),
            session: self.session.as_ref()?.address.clone(),
        })
    }

    /// Stop whichever daemons started, session scope first (reverse start
    /// order), blocking until each has exited. Safe after a partial
    /// `start` failure and idempotent.
    pub fn stop(&mut self) {
        for daemon in [self.session.take(), self.system.take()].into_iter().flatten() {
            let mut child = daemon.child;
            let _ = child.kill();
            let _ = child.wait();
            debug!(scope = %daemon.scope, "bus daemon stopped");
        }
        if let Some(workdir) = self.workdir.take() {
            let _ = std::fs::remove_dir_all(workdir);
        }
    }
}

impl Drop for BusIsolationManager {
    fn drop(&mut self) {
        self.stop();
    }
}

fn bus_config_xml(scope: BusScope, workdir: &std::path::Path) -> String {
    format!(
        r#"<!DOCTYPE busconfig PUBLIC "-//freedesktop//DTD D-Bus Bus Configuration 1.0//EN"
 "http://www.freedesktop.org/standards/dbus/1.0/busconfig.dtd">
<busconfig>
  <type>{scope}</type>
  <keep_umask/>
  <listen>unix:tmpdir={dir}</listen>
  <auth>EXTERNAL</auth>
  <policy context="default">
    <allow send_destination="*" eavesdrop="true"/>
    <allow eavesdrop="true"/>
    <allow own="*"/>
  </policy>
</busconfig>
"#,
        scope = scope.as_str(),
        dir = workdir.display(),
    )
}
