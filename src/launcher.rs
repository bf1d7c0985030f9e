//! Process-launch contract shared by the local launcher and the container redirector.

use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};

use crate::docker::command::check_interrupted;
use crate::env::EnvSnapshot;
use crate::errors::ContainerError;
use crate::util::shell_join_masked;

/// A launch request: command vector, optional per-argument secrecy masks, environment
/// overrides, streams and working directory.
#[derive(Debug, Default)]
pub struct ProcStarter {
    pub cmds: Vec<String>,
    /// `masks[i]` hides `cmds[i]` from logs. `None` means nothing is secret.
    pub masks: Option<Vec<bool>>,
    pub envs: EnvSnapshot,
    pub pwd: Option<PathBuf>,
    pub stdin: Option<Stdio>,
    pub stdout: Option<Stdio>,
    pub stderr: Option<Stdio>,
}

impl ProcStarter {
    pub fn new<I, S>(cmds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cmds: cmds.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn envs(mut self, envs: EnvSnapshot) -> Self {
        self.envs = envs;
        self
    }

    pub fn pwd(mut self, pwd: impl Into<PathBuf>) -> Self {
        self.pwd = Some(pwd.into());
        self
    }

    pub fn stdout(mut self, s: Stdio) -> Self {
        self.stdout = Some(s);
        self
    }

    /// Loggable rendering with masked arguments hidden.
    pub fn preview(&self) -> String {
        shell_join_masked(&self.cmds, self.masks.as_deref().unwrap_or(&[]))
    }
}

/// A started process.
#[derive(Debug)]
pub struct Proc {
    child: Child,
    what: String,
}

impl Proc {
    /// Wait for exit. A non-zero exit is returned as a status, not an error.
    pub fn join(mut self) -> Result<ExitStatus, ContainerError> {
        let status = self
            .child
            .wait()
            .map_err(|e| ContainerError::io(format!("failed waiting for {}", self.what), e))?;
        check_interrupted(&status, &self.what)?;
        Ok(status)
    }
}

/// The "run a process" capability.
pub trait Launcher: Send + Sync {
    fn launch(&self, starter: ProcStarter) -> io::Result<Proc>;
}

/// Spawns directly on the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalLauncher;

impl Launcher for LocalLauncher {
    fn launch(&self, starter: ProcStarter) -> io::Result<Proc> {
        let ProcStarter {
            cmds,
            masks,
            envs,
            pwd,
            stdin,
            stdout,
            stderr,
        } = starter;
        let (program, args) = cmds
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command"))?;
        let what = shell_join_masked(&cmds, masks.as_deref().unwrap_or(&[]));

        let mut cmd = Command::new(program);
        cmd.args(args);
        for (k, v) in envs.iter() {
            cmd.env(k, v);
        }
        if let Some(dir) = pwd {
            cmd.current_dir(dir);
        }
        cmd.stdin(stdin.unwrap_or_else(Stdio::null));
        if let Some(s) = stdout {
            cmd.stdout(s);
        }
        if let Some(s) = stderr {
            cmd.stderr(s);
        }
        let child = cmd.spawn()?;
        Ok(Proc { child, what })
    }
}
