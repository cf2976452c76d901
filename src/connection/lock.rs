//! UUCP style serial port lock files

use std::{
    fs::{self, OpenOptions},
    io::{self, ErrorKind, Write},
    path::{Path, PathBuf},
};

use log::{debug, warn};

use crate::error::Error;

/// Directory holding the lock files
pub const LOCK_DIR: &str = "/var/lock";

/// A held lock on a serial device, removed again when dropped
#[derive(Debug)]
pub struct PortLock {
    path: PathBuf,
}

impl PortLock {
    /// Lock `port` in the system lock directory
    pub fn acquire(port: &str) -> Result<Self, Error> {
        Self::acquire_in(Path::new(LOCK_DIR), port)
    }

    /// Lock `port` using a lock file in `dir`
    pub fn acquire_in(dir: &Path, port: &str) -> Result<Self, Error> {
        let path = dir.join(lock_name(port));

        match create_lock(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                take_over(&path, port)?;
                create_lock(&path).map_err(|e| match e.kind() {
                    ErrorKind::AlreadyExists => Error::PortLocked(port.to_owned()),
                    _ => lock_error(&path, e),
                })?;
            }
            Err(e) => return Err(lock_error(&path, e)),
        }

        let lock = PortLock { path };
        debug!("Locked {} with {}", port, lock.path().display());

        Ok(lock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PortLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to remove lock {}: {}", self.path.display(), e);
        }
    }
}

/// Create the lock file exclusively, holding our PID
fn create_lock(path: &Path) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;

    if let Err(e) = writeln!(file, "{:10}", std::process::id()) {
        let _ = fs::remove_file(path);
        return Err(e);
    }

    Ok(())
}

/// Remove an existing lock whose owner is gone
fn take_over(path: &Path, port: &str) -> Result<(), Error> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(lock_error(path, e)),
    };

    match parse_pid(&contents) {
        Some(pid) if process_alive(pid) => return Err(Error::PortLocked(port.to_owned())),
        Some(pid) => warn!("Taking over stale lock {} of pid {}", path.display(), pid),
        None => warn!("Taking over unreadable lock {}", path.display()),
    }

    match fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(lock_error(path, e)),
        _ => Ok(()),
    }
}

fn lock_name(port: &str) -> String {
    let base = Path::new(port)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| port.to_owned());

    format!("LCK..{}", base)
}

fn parse_pid(contents: &str) -> Option<i32> {
    contents.trim().parse().ok().filter(|&pid| pid > 0)
}

fn lock_error(path: &Path, err: io::Error) -> Error {
    Error::FileOpenError(path.display().to_string(), err)
}

fn process_alive(pid: i32) -> bool {
    // SAFETY: signal 0 performs the permission and existence checks only
    let ret = unsafe { libc::kill(pid, 0) };
    ret == 0 || io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}
