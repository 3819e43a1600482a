//! # Script hooks
//!
//! Triggers can run an external command when a recording starts or ends. Commands run on their
//! own OS thread, the trigger keeps the handle and joins it before starting the same hook again.

use crate::prelude::v1::*;
use log::*;
use std::process::Command;
use std::thread::{self, JoinHandle};

/// Handle of a running script.
pub struct ScriptHandle(JoinHandle<()>);

impl ScriptHandle {
    /// Run `f` on a new named thread.
    pub fn spawn(name: &str, f: impl FnOnce() + Send + 'static) -> Result<Self> {
        thread::Builder::new()
            .name(name.to_string())
            .spawn(f)
            .map(Self)
            .map_err(Into::into)
    }

    pub fn join(self) {
        if self.0.join().is_err() {
            error!("script thread panicked");
        }
    }
}

/// Executor of external commands.
pub trait ScriptRunner: Send + Sync {
    /// Start `path` with `args`, without waiting for it to finish.
    fn run(&self, path: &str, args: &str) -> Result<ScriptHandle>;
}

/// Runs commands through `sh -c`.
#[derive(Default)]
pub struct ShellRunner;

impl ScriptRunner for ShellRunner {
    fn run(&self, path: &str, args: &str) -> Result<ScriptHandle> {
        let cmd = format!("{path} {args}");

        ScriptHandle::spawn(&format!("exec {path}"), move || {
            match Command::new("sh").arg("-c").arg(&cmd).status() {
                Ok(status) if status.success() => debug!("{cmd}: done"),
                Ok(status) => warn!("{cmd}: {status}"),
                Err(e) => error!("{cmd}: {e}"),
            }
        })
    }
}

/// One script hook with at most one running instance.
#[derive(Default)]
pub struct ScriptSlot {
    path: String,
    running: Option<ScriptHandle>,
}

impl ScriptSlot {
    /// Create a slot for `path`. An empty path disables the hook.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            running: None,
        }
    }

    /// Start the script, first joining the previous instance.
    ///
    /// Returns whether the script was started.
    pub fn fire(&mut self, runner: &dyn ScriptRunner, args: &str) -> bool {
        if self.path.is_empty() {
            return false;
        }

        self.join();

        match runner.run(&self.path, args) {
            Ok(handle) => {
                self.running = Some(handle);
                true
            }
            Err(e) => {
                warn!("cannot run {}: {e}", self.path);
                false
            }
        }
    }

    /// Wait for the running instance, if any.
    pub fn join(&mut self) {
        if let Some(handle) = self.running.take() {
            handle.join();
        }
    }
}

impl Drop for ScriptSlot {
    fn drop(&mut self) {
        self.join();
    }
}
