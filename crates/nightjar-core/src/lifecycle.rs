//! Process lifecycle: exclusive lock file, daemonization, the
//! autorestart supervisor, and privilege dropping.
//!
//! Everything here runs before the async runtime starts; forking after
//! runtime threads exist is not supported.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{dup2, fork, setgid, setsid, setuid, ForkResult, Group, User};
use tracing::{info, warn};

/// Lifecycle failures, each mapped to a distinct process exit code.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("cannot obtain lock file {path}: {reason}")]
    Lock { path: PathBuf, reason: String },

    #[error("fork failed: {0}")]
    Fork(String),

    #[error("unknown user '{0}'")]
    UnknownUser(String),

    #[error("unknown group '{0}'")]
    UnknownGroup(String),

    #[error("cannot drop privileges: {0}")]
    Privileges(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LifecycleError {
    pub fn exit_code(&self) -> i32 {
        match self {
            LifecycleError::UnknownUser(_) => 3,
            LifecycleError::UnknownGroup(_) => 4,
            LifecycleError::Privileges(_) => 5,
            LifecycleError::Fork(_) => 6,
            LifecycleError::Lock { .. } | LifecycleError::Io(_) => 10,
        }
    }
}

/// Held exclusive lock; released when dropped.
#[derive(Debug)]
pub struct LockFile {
    _flock: Flock<File>,
    path: PathBuf,
}

impl LockFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Take the per-device exclusive lock and record our pid in it. A second
/// daemon for the same device fails here instead of fighting over the
/// port.
pub fn acquire_lock(prefix: &Path, device_name: &str) -> Result<LockFile, LifecycleError> {
    std::fs::create_dir_all(prefix)?;
    let path = prefix.join(format!("{device_name}.lock"));
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)?;
    let flock = Flock::lock(file, FlockArg::LockExclusiveNonblock).map_err(|(_, errno)| {
        LifecycleError::Lock {
            path: path.clone(),
            reason: format!("held by another process ({errno})"),
        }
    })?;
    flock.set_len(0)?;
    let mut pidfile: &File = &flock;
    writeln!(pidfile, "{}", std::process::id())?;
    info!(path = %path.display(), "lock acquired");
    Ok(LockFile {
        _flock: flock,
        path,
    })
}

/// Detach from the controlling terminal: fork, exit the parent, start a
/// new session, and point the standard descriptors at `/dev/null`.
#[allow(unsafe_code)]
pub fn daemonize() -> Result<(), LifecycleError> {
    // SAFETY: called before the runtime starts; the process is still
    // single-threaded.
    match unsafe { fork() }.map_err(|e| LifecycleError::Fork(e.to_string()))? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }
    setsid().map_err(|e| LifecycleError::Fork(e.to_string()))?;
    let null = OpenOptions::new().read(true).write(true).open("/dev/null")?;
    for fd in 0..=2 {
        dup2(null.as_raw_fd(), fd).map_err(|e| LifecycleError::Fork(e.to_string()))?;
    }
    Ok(())
}

/// Supervise a worker child, restarting it `delay` after it dies with a
/// nonzero status. Returns in the worker child; a clean worker exit ends
/// the supervisor as well.
#[allow(unsafe_code)]
pub fn autorestart(delay: std::time::Duration) -> Result<(), LifecycleError> {
    loop {
        // SAFETY: called before the runtime starts; the process is still
        // single-threaded.
        match unsafe { fork() }.map_err(|e| LifecycleError::Fork(e.to_string()))? {
            ForkResult::Child => return Ok(()),
            ForkResult::Parent { child } => {
                match waitpid(child, None).map_err(|e| LifecycleError::Fork(e.to_string()))? {
                    WaitStatus::Exited(_, 0) => std::process::exit(0),
                    status => {
                        warn!(?status, "worker died, restarting");
                        std::thread::sleep(delay);
                    }
                }
            }
        }
    }
}

/// Drop privileges to `user` or `user.group` after binding the listener.
pub fn run_as(spec: &str) -> Result<(), LifecycleError> {
    let (user_name, group_name) = match spec.split_once('.') {
        Some((u, g)) => (u, Some(g)),
        None => (spec, None),
    };
    let user = User::from_name(user_name)
        .map_err(|e| LifecycleError::Privileges(e.to_string()))?
        .ok_or_else(|| LifecycleError::UnknownUser(user_name.to_string()))?;
    let gid = match group_name {
        Some(g) => {
            Group::from_name(g)
                .map_err(|e| LifecycleError::Privileges(e.to_string()))?
                .ok_or_else(|| LifecycleError::UnknownGroup(g.to_string()))?
                .gid
        }
        None => user.gid,
    };
    // group first; after setuid we may no longer be allowed to
    setgid(gid).map_err(|e| LifecycleError::Privileges(e.to_string()))?;
    setuid(user.uid).map_err(|e| LifecycleError::Privileges(e.to_string()))?;
    info!(user = user_name, "privileges dropped");
    Ok(())
}
