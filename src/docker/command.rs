//! Runtime command lines with per-argument masks, plus subprocess status mapping.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Output, Stdio};

use crate::errors::{logged, ContainerError};
use crate::util::shell_join_masked;

/// A runtime invocation under construction.
///
/// `masks[i]` marks `args[i]` as secret; secret arguments never appear in [`DockerCommand::preview`].
#[derive(Debug, Clone)]
pub struct DockerCommand {
    program: PathBuf,
    args: Vec<String>,
    masks: Vec<bool>,
    envs: Vec<(String, OsString)>,
}

impl DockerCommand {
    pub fn new(program: &Path) -> Self {
        Self {
            program: program.to_path_buf(),
            args: Vec::new(),
            masks: Vec::new(),
            envs: Vec::new(),
        }
    }

    pub fn arg(&mut self, a: impl Into<String>) -> &mut Self {
        self.masked_arg(a, false)
    }

    pub fn masked_arg(&mut self, a: impl Into<String>, masked: bool) -> &mut Self {
        self.args.push(a.into());
        self.masks.push(masked);
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for a in args {
            self.arg(a);
        }
        self
    }

    /// Process environment for the runtime binary itself (e.g. `DOCKER_CERT_PATH`).
    pub fn env(&mut self, key: impl Into<String>, value: impl Into<OsString>) -> &mut Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Program plus arguments, unmasked. Only for handing to a launcher, never for logging.
    pub fn argv(&self) -> Vec<String> {
        let mut v = Vec::with_capacity(self.args.len() + 1);
        v.push(self.program.display().to_string());
        v.extend(self.args.iter().cloned());
        v
    }

    /// Masks aligned with [`DockerCommand::argv`].
    pub fn argv_masks(&self) -> Vec<bool> {
        let mut v = Vec::with_capacity(self.masks.len() + 1);
        v.push(false);
        v.extend(self.masks.iter().copied());
        v
    }

    /// Loggable command line.
    pub fn preview(&self) -> String {
        shell_join_masked(&self.argv(), &self.argv_masks())
    }

    pub fn env_pairs(&self) -> &[(String, OsString)] {
        &self.envs
    }

    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (k, v) in &self.envs {
            cmd.env(k, v);
        }
        cmd
    }

    fn what(&self) -> String {
        let sub = self.args.first().map(String::as_str).unwrap_or("");
        format!("docker {sub}")
    }

    /// Run with output streamed to the build log.
    pub fn status(&self) -> Result<ExitStatus, ContainerError> {
        eprintln!("docker-build-env: docker: {}", self.preview());
        let status = self
            .to_command()
            .stdin(Stdio::null())
            .status()
            .map_err(|e| spawn_error(&self.program, e))?;
        check_interrupted(&status, &self.what())?;
        Ok(status)
    }

    /// Run silently unless `verbose`, in which case it is echoed and streamed.
    pub fn status_quiet(&self, verbose: bool) -> Result<ExitStatus, ContainerError> {
        if verbose {
            return self.status();
        }
        let status = self
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| spawn_error(&self.program, e))?;
        check_interrupted(&status, &self.what())?;
        Ok(status)
    }

    /// Run capturing stdout. With `echo` the line is previewed and stderr streams to the build log.
    pub fn output(&self, echo: bool) -> Result<Output, ContainerError> {
        if echo {
            eprintln!("docker-build-env: docker: {}", self.preview());
        }
        let out = self
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(if echo { Stdio::inherit() } else { Stdio::null() })
            .output()
            .map_err(|e| spawn_error(&self.program, e))?;
        check_interrupted(&out.status, &self.what())?;
        Ok(out)
    }
}

fn spawn_error(program: &Path, e: io::Error) -> ContainerError {
    if e.kind() == io::ErrorKind::NotFound {
        ContainerError::RuntimeNotFound(e)
    } else {
        ContainerError::io(format!("failed to start {}", program.display()), e)
    }
}

/// Map a subprocess killed by an interrupting signal to `InterruptedDuringSubprocess`.
pub fn check_interrupted(status: &ExitStatus, what: &str) -> Result<(), ContainerError> {
    #[cfg(unix)]
    {
        use nix::sys::signal::Signal;
        use std::os::unix::process::ExitStatusExt;

        if let Some(sig) = status.signal() {
            if let Ok(
                Signal::SIGINT | Signal::SIGTERM | Signal::SIGKILL | Signal::SIGHUP,
            ) = Signal::try_from(sig)
            {
                return Err(logged(ContainerError::InterruptedDuringSubprocess {
                    what: what.to_string(),
                }));
            }
        }
    }
    #[cfg(not(unix))]
    let _ = (status, what);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_masks_secret_args() {
        let mut c = DockerCommand::new(Path::new("docker"));
        c.arg("run").arg("--env").masked_arg("TOKEN=abc", true);
        c.arg("--env").arg("PATH=/bin");
        let p = c.preview();
        assert_eq!(p, "docker run --env ******** --env PATH=/bin");
        assert_eq!(c.argv_masks(), vec![false, false, false, true, false, false]);
    }

    #[cfg(unix)]
    #[test]
    fn test_signal_exit_maps_to_interrupted() {
        use std::os::unix::process::ExitStatusExt;
        // raw wait status: terminated by signal 2 (SIGINT)
        let st = ExitStatus::from_raw(2);
        let err = check_interrupted(&st, "docker pull").unwrap_err();
        assert!(matches!(err, ContainerError::InterruptedDuringSubprocess { .. }));

        let ok = ExitStatus::from_raw(1 << 8);
        assert!(check_interrupted(&ok, "docker pull").is_ok());
    }
}
