//! Isolated display provisioning with collision retry.
//!
//! Allocation walks a candidate display number downward from a ceiling.
//! A candidate is taken when the well-known X lock file exists or when our
//! own reservation file cannot be exclusively created; the reservation is
//! the atomic check that makes concurrent sandboxes race safely instead of
//! read-then-act on the lock directory. The spawned server must report the
//! display number it actually took; a mismatch is fatal.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

/// Errors from display provisioning. All are fatal for the sandbox.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// Every candidate display down to the floor was taken or unusable.
    #[error("no free display number between 0 and {ceiling}")]
    ResourceExhausted { ceiling: u32 },

    /// The server reported a different display than it was asked to use.
    #[error("display server reported `{reported}` instead of :{requested}")]
    DisplayMismatch { requested: u32, reported: String },

    /// The display server binary could not be spawned at all.
    #[error("failed to spawn display server `{program}`")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Reservation bookkeeping failed for a reason other than collision.
    #[error("display reservation I/O failure")]
    Io(#[from] std::io::Error),
}

/// Display server invocation and allocation policy.
#[derive(Debug, Clone)]
pub struct DisplayConfig {
    /// Display server program; the candidate display (`:N`) and
    /// `-displayfd 1` are appended so the server prints the number it took.
    pub program: String,

    /// Extra server arguments (screen geometry and the like).
    pub extra_args: Vec<String>,

    /// First candidate display number; allocation walks downward.
    pub ceiling: u32,

    /// Directory holding the well-known `.X<N>-lock` indicator files.
    pub lock_dir: PathBuf,

    /// Directory for our own exclusive reservation files.
    pub reservation_dir: PathBuf,

    /// How long to wait for the server to report its display number.
    pub startup_timeout: Duration,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            program: "Xvfb".to_string(),
            extra_args: vec![
                "-screen".to_string(),
                "0".to_string(),
                "1280x1024x24".to_string(),
            ],
            ceiling: 99,
            lock_dir: PathBuf::from("/tmp"),
            reservation_dir: std::env::temp_dir(),
            startup_timeout: Duration::from_secs(10),
        }
    }
}

/// A successfully provisioned display. Released through
/// [`DisplayProvisioner::release`]; dropping an unreleased handle cleans up
/// best-effort.
#[derive(Debug)]
pub struct DisplayHandle {
    number: u32,
    child: Option<Child>,
    reservation: Option<PathBuf>,
    released: bool,
}

impl DisplayHandle {
    /// Handle that owns nothing; releasing it is a no-op.
    #[must_use]
    pub fn unacquired() -> Self {
        Self {
            number: 0,
            child: None,
            reservation: None,
            released: true,
        }
    }

    #[must_use]
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Display identifier in the form children expect, e.g. `:99`.
    #[must_use]
    pub fn display(&self) -> String {
        format!(":{}", self.number)
    }

    fn teardown(&mut self) {
        if self.released {
            return;
        }
        if let Some(child) = self.child.as_mut() {
            let _ = child.kill();
            let _ = child.wait();
        }
        self.child = None;
        if let Some(reservation) = self.reservation.take() {
            let _ = std::fs::remove_file(reservation);
        }
        self.released = true;
    }
}

impl Drop for DisplayHandle {
    fn drop(&mut self) {
        self.teardown();
    }
}

enum Attempt {
    /// Server confirmed the candidate; handle is live.
    Confirmed(Child),
    /// Server produced no output (crash-on-start) or went silent; the
    /// candidate is unavailable, try the next one.
    Unavailable,
}

/// Allocates isolated displays, retrying on collision.
pub struct DisplayProvisioner {
    config: DisplayConfig,
}

impl DisplayProvisioner {
    #[must_use]
    pub fn new(config: DisplayConfig) -> Self {
        Self { config }
    }

    /// Acquire a free display, walking candidates downward from the
    /// ceiling. Fails with `ResourceExhausted` once the candidate would
    /// drop below zero.
    pub fn acquire(&self) -> Result<DisplayHandle, ProvisionError> {
        let mut candidate = self.config.ceiling as i64;
        while candidate >= 0 {
            let number = candidate as u32;
            candidate -= 1;

            let x_lock = self.config.lock_dir.join(format!(".X{number}-lock"));
            if x_lock.exists() {
                debug!(display = number, "X lock present, skipping");
                continue;
            }

            let reservation = self
                .config
                .reservation_dir
                .join(format!("panel-lab-display-{number}.lock"));
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&reservation)
            {
                Ok(_) => {}
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    debug!(display = number, "reserved by another sandbox, skipping");
                    continue;
                }
                Err(err) => return Err(ProvisionError::Io(err)),
            }

            match self.try_spawn(number) {
                Ok(Attempt::Confirmed(child)) => {
                    info!(display = number, "display provisioned");
                    return Ok(DisplayHandle {
                        number,
                        child: Some(child),
                        reservation: Some(reservation),
                        released: false,
                    });
                }
                Ok(Attempt::Unavailable) => {
                    let _ = std::fs::remove_file(&reservation);
                    warn!(display = number, "display unavailable, retrying lower");
                    continue;
                }
                Err(err) => {
                    let _ = std::fs::remove_file(&reservation);
                    return Err(err);
                }
            }
        }
        Err(ProvisionError::ResourceExhausted {
            ceiling: self.config.ceiling,
        })
    }

    fn try_spawn(&self, number: u32) -> Result<Attempt, ProvisionError> {
        let mut cmd = Command::new(&self.config.program);
        cmd.arg(format!(":{number}"))
            .arg("-displayfd")
            .arg("1")
            .args(&self.config.extra_args)
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        let mut child = cmd.spawn().map_err(|source| ProvisionError::Spawn {
            program: self.config.program.clone(),
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
            Ok(Ok((0, _))) | Ok(Err(_)) => {
                // No output before exiting: the display is unavailable,
                // not a fatal error.
                let _ = child.kill();
                let _ = child.wait();
                Ok(Attempt::Unavailable)
            }
            Ok(Ok((_, line))) => {
                let reported = line.trim().to_string();
                if reported.parse::<u32>() == Ok(number) {
                    Ok(Attempt::Confirmed(child))
                } else {
                    let _ = child.kill();
                    let _ = child.wait();
                    Err(ProvisionError::DisplayMismatch {
                        requested: number,
                        reported,
                    })
                }
            }
            Err(_) => {
                // Server alive but silent past the deadline.
                let _ = child.kill();
                let _ = child.wait();
                Ok(Attempt::Unavailable)
            }
        }
    }

    /// Terminate the display server and wait for exit. Idempotent: a
    /// second call, or a call on a never-acquired handle, is a no-op.
    pub fn release(&self, handle: &mut DisplayHandle) {
        handle.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn echo_server(dir: &Path) -> PathBuf {
        // Prints the display number it was given, then lingers like a
        // real server would.
        write_script(
            dir,
            "fake-display",
            "#!/bin/sh\nnum=${1#:}\necho \"$num\"\nexec sleep 60\n",
        )
    }

    fn config(dir: &TempDir, program: &Path, ceiling: u32) -> DisplayConfig {
        DisplayConfig {
            program: program.display().to_string(),
            extra_args: Vec::new(),
            ceiling,
            lock_dir: dir.path().join("locks"),
            reservation_dir: dir.path().join("reservations"),
            startup_timeout: Duration::from_secs(5),
        }
    }

    fn prepared(dir: &TempDir, program: &Path, ceiling: u32) -> DisplayProvisioner {
        let cfg = config(dir, program, ceiling);
        std::fs::create_dir_all(&cfg.lock_dir).unwrap();
        std::fs::create_dir_all(&cfg.reservation_dir).unwrap();
        DisplayProvisioner::new(cfg)
    }

    #[test]
    fn acquires_ceiling_when_free() {
        let dir = TempDir::new().unwrap();
        let server = echo_server(dir.path());
        let prov = prepared(&dir, &server, 99);
        let mut handle = prov.acquire().unwrap();
        assert_eq!(handle.number(), 99);
        assert_eq!(handle.display(), ":99");
        prov.release(&mut handle);
    }

    #[test]
    fn x_lock_file_skips_candidate() {
        let dir = TempDir::new().unwrap();
        let server = echo_server(dir.path());
        let prov = prepared(&dir, &server, 99);
        std::fs::write(dir.path().join("locks/.X99-lock"), "1234\n").unwrap();
        let mut handle = prov.acquire().unwrap();
        assert_eq!(handle.number(), 98);
        prov.release(&mut handle);
    }

    #[test]
    fn reservation_collision_skips_candidate() {
        let dir = TempDir::new().unwrap();
        let server = echo_server(dir.path());
        let prov = prepared(&dir, &server, 50);
        std::fs::write(
            dir.path().join("reservations/panel-lab-display-50.lock"),
            "",
        )
        .unwrap();
        let mut handle = prov.acquire().unwrap();
        assert_eq!(handle.number(), 49);
        prov.release(&mut handle);
    }

    #[test]
    fn mismatched_report_is_fatal() {
        let dir = TempDir::new().unwrap();
        let server = write_script(
            dir.path(),
            "liar",
            "#!/bin/sh\necho 7\nexec sleep 60\n",
        );
        let prov = prepared(&dir, &server, 99);
        let err = prov.acquire().unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::DisplayMismatch { requested: 99, .. }
        ));
    }

    #[test]
    fn silent_crash_retries_next_candidate() {
        let dir = TempDir::new().unwrap();
        // Crashes without output on :99, behaves on anything else.
        let server = write_script(
            dir.path(),
            "flaky",
            "#!/bin/sh\nif [ \"$1\" = \":99\" ]; then exit 1; fi\nnum=${1#:}\necho \"$num\"\nexec sleep 60\n",
        );
        let prov = prepared(&dir, &server, 99);
        let mut handle = prov.acquire().unwrap();
        assert_eq!(handle.number(), 98);
        prov.release(&mut handle);
    }

    #[test]
    fn all_candidates_taken_is_resource_exhausted() {
        let dir = TempDir::new().unwrap();
        let server = write_script(dir.path(), "dead", "#!/bin/sh\nexit 1\n");
        let prov = prepared(&dir, &server, 1);
        let err = prov.acquire().unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::ResourceExhausted { ceiling: 1 }
        ));
    }

    #[test]
    fn release_is_idempotent_and_frees_reservation() {
        let dir = TempDir::new().unwrap();
        let server = echo_server(dir.path());
        let prov = prepared(&dir, &server, 99);
        let mut handle = prov.acquire().unwrap();
        let reservation = dir.path().join("reservations/panel-lab-display-99.lock");
        assert!(reservation.exists());
        prov.release(&mut handle);
        prov.release(&mut handle);
        assert!(!reservation.exists());

        let mut never = DisplayHandle::unacquired();
        prov.release(&mut never);
    }

    #[test]
    fn missing_server_binary_is_fatal_spawn_error() {
        let dir = TempDir::new().unwrap();
        let prov = prepared(&dir, Path::new("/nonexistent/display-server"), 99);
        assert!(matches!(
            prov.acquire().unwrap_err(),
            ProvisionError::Spawn { .. }
        ));
    }
}
