//! Process Redirector: launches go into the session's container while it is enabled.

use std::io;
use std::sync::Arc;

use crate::env::{EnvContributor, EnvSnapshot};
use crate::errors::{logged, ContainerError};
use crate::launcher::{Launcher, Proc, ProcStarter};
use crate::session::ContainerSession;

/// Wraps the real launcher; exposes the same launch contract.
pub struct DockerRedirector {
    inner: Arc<dyn Launcher>,
    session: Arc<ContainerSession>,
    contributors: Vec<Arc<dyn EnvContributor>>,
}

impl DockerRedirector {
    pub fn new(inner: Arc<dyn Launcher>, session: Arc<ContainerSession>) -> Self {
        Self {
            inner,
            session,
            contributors: Vec::new(),
        }
    }

    /// Add a build-setup collaborator whose variables are layered over the container baseline.
    pub fn with_contributor(mut self, c: Arc<dyn EnvContributor>) -> Self {
        self.contributors.push(c);
        self
    }

    pub fn session(&self) -> &Arc<ContainerSession> {
        &self.session
    }

    /// Variables the redirected command needs beyond what the container already has.
    ///
    /// Layering: baseline, launch overrides, contributors, session variables. Contributors go
    /// after the overrides so a `PATH+X` adjustment survives a launch that carries its own PATH.
    pub fn effective_env(
        &self,
        baseline: &EnvSnapshot,
        overrides: &EnvSnapshot,
    ) -> EnvSnapshot {
        let mut env = baseline.clone();
        env.override_all(overrides);
        for c in &self.contributors {
            c.build_env_vars(&mut env);
        }
        self.session.build_env_vars(&mut env);
        env.resolve();
        env.without_unchanged(baseline)
    }

    /// Rewrite `starter` into a container exec, provisioning on first use.
    pub fn redirect(&self, starter: &mut ProcStarter) -> Result<(), ContainerError> {
        let container = self.session.ensure_provisioned()?;
        let baseline = self.session.baseline_env(&container)?;
        let env = self.effective_env(baseline, &starter.envs);
        self.session.client().exec_in(
            &container,
            self.session.user(),
            starter,
            &env,
            self.session.exec_style(),
        );
        Ok(())
    }
}

impl Launcher for DockerRedirector {
    fn launch(&self, mut starter: ProcStarter) -> io::Result<Proc> {
        if !self.session.is_enabled() {
            return self.inner.launch(starter);
        }
        self.redirect(&mut starter).map_err(io::Error::other)?;
        eprintln!("docker-build-env: docker: {}", starter.preview());
        let container = self.session.container_id().unwrap_or_default();
        self.inner.launch(starter).map_err(|source| {
            let e = if source.kind() == io::ErrorKind::NotFound {
                ContainerError::RuntimeNotFound(source)
            } else {
                ContainerError::ExecFailed { container, source }
            };
            io::Error::other(logged(e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::{BuildIdentity, ClientOptions, DockerClient};
    use crate::env::StaticEnv;
    use crate::image::{ImageSelector, PullImage};
    use crate::launcher::LocalLauncher;
    use crate::session::{BuildContext, ContainerSettings};
    use std::path::PathBuf;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Vec<String>>>);

    impl Launcher for Recorder {
        fn launch(&self, starter: ProcStarter) -> io::Result<Proc> {
            self.0
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .push(starter.cmds.clone());
            LocalLauncher.launch(ProcStarter::new(["/bin/sh", "-c", "exit 0"]))
        }
    }

    fn session() -> Arc<ContainerSession> {
        let client = DockerClient::new(
            PathBuf::from("/nonexistent/docker"),
            &ClientOptions::default(),
            BuildIdentity {
                project: "demo".to_string(),
                number: 1,
            },
        )
        .expect("client");
        let build = BuildContext {
            identity: client.identity().clone(),
            workspace: PathBuf::from("/ws"),
            tmp_dir: PathBuf::from("/tmp"),
            tools_dir: None,
            env: EnvSnapshot::new(),
        };
        Arc::new(ContainerSession::new(
            client,
            Arc::new(ImageSelector::Pull(PullImage {
                image: "alpine:3.6".to_string(),
            })),
            ContainerSettings::default(),
            build,
        ))
    }

    #[cfg(unix)]
    #[test]
    fn test_disabled_session_passes_through() {
        let rec = Arc::new(Recorder::default());
        let r = DockerRedirector::new(rec.clone(), session());
        r.launch(ProcStarter::new(["echo", "hi"]))
            .expect("launch")
            .join()
            .expect("join");
        let seen = rec.0.lock().expect("lock").clone();
        assert_eq!(seen, vec![vec!["echo".to_string(), "hi".to_string()]]);
    }

    #[test]
    fn test_effective_env_drops_baseline_values_and_resolves() {
        let r = DockerRedirector::new(Arc::new(LocalLauncher), session()).with_contributor(
            Arc::new(StaticEnv(vec![(
                "PATH+TOOLS".to_string(),
                "$TOOLS_HOME/bin".to_string(),
            )])),
        );
        let baseline = EnvSnapshot::from_pairs([("PATH", "/usr/bin"), ("HOME", "/root")]);
        let overrides = EnvSnapshot::from_pairs([("TOOLS_HOME", "/opt/tools"), ("HOME", "/root")]);
        let env = r.effective_env(&baseline, &overrides);
        assert_eq!(env.get("PATH"), Some("/opt/tools/bin:/usr/bin"));
        assert_eq!(env.get("TOOLS_HOME"), Some("/opt/tools"));
        assert!(!env.contains_key("HOME"));
    }

    #[test]
    fn test_contributed_path_survives_launch_path_override() {
        let r = DockerRedirector::new(Arc::new(LocalLauncher), session()).with_contributor(
            Arc::new(StaticEnv(vec![(
                "PATH+JDK".to_string(),
                "/opt/jdk/bin".to_string(),
            )])),
        );
        let baseline = EnvSnapshot::from_pairs([("PATH", "/usr/bin:/bin")]);
        let overrides = EnvSnapshot::from_pairs([("PATH", "/usr/bin:/bin")]);
        let env = r.effective_env(&baseline, &overrides);
        assert_eq!(env.get("PATH"), Some("/opt/jdk/bin:/usr/bin:/bin"));
    }
}
