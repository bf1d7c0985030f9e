//! Container Session: one build's container, from enablement to teardown.
//!
//! Lifecycle: `Disabled -> Enabled -> Provisioned -> TornDown`.
//! - at most one container is started per session; the id is written once
//! - provisioning runs under the state lock so racing launches cannot start a second container
//! - teardown disables first and is a no-op the second time

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
#[cfg(feature = "otel")]
use tracing::instrument;

use crate::docker::{resolve_bridge_ip, BuildIdentity, DockerClient, ExecEnvStyle, RunSpec};
use crate::env::{EnvContributor, EnvSnapshot};
use crate::errors::{logged, ContainerError};
use crate::image::{ImageProvider, ResolveContext};
use crate::util::{container_name, container_user, shell_like_split_args};

/// Idle command that keeps the container alive between `exec` calls.
pub const DEFAULT_COMMAND: &str = "/bin/cat";

const DOCKER_SOCKET: &str = "/var/run/docker.sock";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    #[default]
    Disabled,
    Enabled,
    Provisioned,
    TornDown,
}

/// Persisted part of a session. Derived values (baseline env, effective user) are not stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionState {
    pub phase: Phase,
    pub image: Option<String>,
    pub container_id: Option<String>,
    /// host path -> container path
    pub mounts: BTreeMap<String, String>,
    pub ports: BTreeMap<u16, u16>,
    pub links: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Volume {
    pub host: String,
    pub container: String,
}

/// Container options from the build configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContainerSettings {
    pub privileged: bool,
    /// Group override for the in-container user; the host gid is used otherwise.
    pub group: Option<String>,
    /// Long-running idle command, split shell-style. Defaults to `/bin/cat`.
    pub command: Option<String>,
    pub network: Option<String>,
    pub memory: Option<String>,
    pub cpu_shares: Option<String>,
    pub volumes: Vec<Volume>,
    pub ports: BTreeMap<u16, u16>,
    pub links: BTreeMap<String, String>,
    pub force_pull: bool,
    pub no_cache: bool,
    /// Keep the image's own working directory instead of the workspace.
    pub use_image_workdir: bool,
    /// Mount the host's docker socket into the container.
    pub expose_docker: bool,
    pub exec_env: ExecEnvStyle,
}

/// Build facts the session needs but never persists.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub identity: BuildIdentity,
    pub workspace: PathBuf,
    pub tmp_dir: PathBuf,
    pub tools_dir: Option<PathBuf>,
    pub env: EnvSnapshot,
}

pub struct ContainerSession {
    client: DockerClient,
    provider: Arc<dyn ImageProvider>,
    settings: ContainerSettings,
    build: BuildContext,
    state: Mutex<SessionState>,
    baseline: OnceCell<EnvSnapshot>,
    user: OnceCell<String>,
}

impl std::fmt::Debug for ContainerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerSession")
            .field("state", &self.state())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ContainerSession {
    /// A fresh, disabled session seeded with the configured mounts, ports and links.
    pub fn new(
        client: DockerClient,
        provider: Arc<dyn ImageProvider>,
        settings: ContainerSettings,
        build: BuildContext,
    ) -> Self {
        let mut state = SessionState::default();
        for v in &settings.volumes {
            state.mounts.insert(v.host.clone(), v.container.clone());
        }
        if settings.expose_docker {
            state
                .mounts
                .insert(DOCKER_SOCKET.to_string(), DOCKER_SOCKET.to_string());
        }
        state.ports = settings.ports.clone();
        state.links = settings.links.clone();
        Self::restore(client, provider, settings, build, state)
    }

    /// Rebuild a session from persisted state; transient caches start empty.
    pub fn restore(
        client: DockerClient,
        provider: Arc<dyn ImageProvider>,
        settings: ContainerSettings,
        build: BuildContext,
        state: SessionState,
    ) -> Self {
        Self {
            client,
            provider,
            settings,
            build,
            state: Mutex::new(state),
            baseline: OnceCell::new(),
            user: OnceCell::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn state(&self) -> SessionState {
        self.lock().clone()
    }

    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self.phase(), Phase::Enabled | Phase::Provisioned)
    }

    pub fn container_id(&self) -> Option<String> {
        self.lock().container_id.clone()
    }

    pub fn image(&self) -> Option<String> {
        self.lock().image.clone()
    }

    pub fn client(&self) -> &DockerClient {
        &self.client
    }

    pub fn settings(&self) -> &ContainerSettings {
        &self.settings
    }

    pub fn build(&self) -> &BuildContext {
        &self.build
    }

    pub fn exec_style(&self) -> ExecEnvStyle {
        self.settings.exec_env
    }

    /// Effective `uid:gid` inside the container.
    pub fn user(&self) -> &str {
        self.user
            .get_or_init(|| container_user(self.settings.group.as_deref()))
    }

    /// Register a bind mount; a repeated host path replaces the earlier one.
    pub fn bind_mount(&self, host: impl Into<String>, container: impl Into<String>) {
        self.lock().mounts.insert(host.into(), container.into());
    }

    /// Checkout-complete signal. Only moves a disabled session forward.
    ///
    /// A session still holding a container (its teardown failed) is never re-enabled.
    pub fn enable(&self) {
        let mut st = self.lock();
        if st.phase == Phase::Disabled && st.container_id.is_none() {
            st.phase = Phase::Enabled;
        }
    }

    /// Build-step wrapper variant: enable and provision right away.
    pub fn setup(&self) -> Result<String, ContainerError> {
        self.enable();
        self.ensure_provisioned()
    }

    /// Return the container id, starting the container on first use.
    #[cfg_attr(feature = "otel", instrument(level = "info", skip(self), err))]
    pub fn ensure_provisioned(&self) -> Result<String, ContainerError> {
        let mut st = self.lock();
        if st.phase == Phase::Provisioned {
            if let Some(id) = st.container_id.as_ref() {
                return Ok(id.clone());
            }
        }
        if st.phase != Phase::Enabled {
            return Err(logged(ContainerError::NotEnabled {
                image: st.image.clone().unwrap_or_else(|| "<unresolved>".to_string()),
            }));
        }

        let image = match st.image.clone() {
            Some(i) => i,
            None => {
                let ctx = ResolveContext {
                    client: &self.client,
                    env: &self.build.env,
                    workspace: &self.build.workspace,
                    force_pull: self.settings.force_pull,
                    no_cache: self.settings.no_cache,
                };
                let resolved = self.provider.resolve(&ctx)?;
                st.image = Some(resolved.clone());
                resolved
            }
        };

        let spec = self.run_spec(&image, &st);
        let bridge_ip = if spec.needs_dockerhost_alias() {
            Some(resolve_bridge_ip(&self.client, &image)?)
        } else {
            None
        };
        let id = self.client.run_detached(&spec, bridge_ip)?;

        let use_err = crate::color::color_enabled_stderr();
        crate::color::log_info_stderr(
            use_err,
            &format!("docker-build-env: started container {id} from image {image}"),
        );
        st.container_id = Some(id.clone());
        st.phase = Phase::Provisioned;
        Ok(id)
    }

    /// Mounts used at provisioning: workspace, temp dir, tools dir, then registered mounts.
    /// Host paths are expanded against the build environment; later keys win.
    pub fn effective_mounts(&self, state: &SessionState) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        let mut add = |host: &Path| {
            let h = host.display().to_string();
            out.insert(h.clone(), h);
        };
        add(&self.build.workspace);
        add(&self.build.tmp_dir);
        if let Some(tools) = self.build.tools_dir.as_deref() {
            add(tools);
        }
        for (host, container) in &state.mounts {
            out.insert(self.build.env.expand(host), container.clone());
        }
        out
    }

    fn run_spec(&self, image: &str, state: &SessionState) -> RunSpec {
        let command = self
            .settings
            .command
            .as_deref()
            .map(shell_like_split_args)
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| vec![DEFAULT_COMMAND.to_string()]);
        RunSpec {
            image: image.to_string(),
            name: container_name(&self.build.identity.project, self.build.identity.number),
            workdir: if self.settings.use_image_workdir {
                None
            } else {
                Some(self.build.workspace.display().to_string())
            },
            mounts: self.effective_mounts(state),
            ports: state.ports.clone(),
            links: state.links.clone(),
            env: self.build.env.clone(),
            network: self.settings.network.clone(),
            memory: self.settings.memory.clone(),
            cpu_shares: self.settings.cpu_shares.clone(),
            privileged: self.settings.privileged,
            command,
        }
    }

    /// The container's own environment, captured once per session.
    pub fn baseline_env(&self, container: &str) -> Result<&EnvSnapshot, ContainerError> {
        self.baseline
            .get_or_try_init(|| self.client.get_env(container, self.user()))
    }

    /// Disable, then kill and remove the container if one was started. Safe to call twice.
    ///
    /// `TornDown` is only committed once the kill succeeded; after a failed kill the session
    /// stays disabled with its container id so a later teardown tries again.
    #[cfg_attr(feature = "otel", instrument(level = "info", skip(self), err))]
    pub fn tear_down(&self) -> Result<(), ContainerError> {
        let id = {
            let mut st = self.lock();
            if st.phase == Phase::TornDown {
                return Ok(());
            }
            match st.container_id.clone() {
                Some(id) => {
                    st.phase = Phase::Disabled;
                    id
                }
                None => {
                    st.phase = Phase::TornDown;
                    return Ok(());
                }
            }
        };
        let use_err = crate::color::color_enabled_stderr();
        crate::color::log_info_stderr(
            use_err,
            &format!("docker-build-env: stopping container {id}"),
        );
        self.client.kill_and_remove(&id)?;
        self.lock().phase = Phase::TornDown;
        Ok(())
    }
}

impl EnvContributor for ContainerSession {
    fn build_env_vars(&self, env: &mut EnvSnapshot) {
        let st = self.lock();
        if !matches!(st.phase, Phase::Enabled | Phase::Provisioned) {
            return;
        }
        let Some(id) = st.container_id.as_deref() else {
            return;
        };
        env.insert("BUILD_CONTAINER_ID", id);
        if let Some(host) = self.client.host() {
            env.insert("BUILD_DOCKER_HOST", host);
        }
        if let Some(image) = st.image.as_deref() {
            env.insert("BUILD_DOCKER_IMAGE", image);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::ClientOptions;
    use crate::image::{ImageSelector, PullImage};

    fn session(settings: ContainerSettings) -> ContainerSession {
        let client = DockerClient::new(
            PathBuf::from("/nonexistent/docker"),
            &ClientOptions::default(),
            BuildIdentity {
                project: "demo".to_string(),
                number: 1,
            },
        )
        .expect("client");
        let provider = Arc::new(ImageSelector::Pull(PullImage {
            image: "alpine:3.6".to_string(),
        }));
        let build = BuildContext {
            identity: client.identity().clone(),
            workspace: PathBuf::from("/ws/demo"),
            tmp_dir: PathBuf::from("/tmp"),
            tools_dir: None,
            env: EnvSnapshot::from_pairs([("CACHE", "/cache")]),
        };
        ContainerSession::new(client, provider, settings, build)
    }

    #[test]
    fn test_duplicate_host_paths_last_wins() {
        let s = session(ContainerSettings {
            volumes: vec![
                Volume {
                    host: "/data".to_string(),
                    container: "/first".to_string(),
                },
                Volume {
                    host: "/data".to_string(),
                    container: "/second".to_string(),
                },
            ],
            ..Default::default()
        });
        s.bind_mount("$CACHE/m2", "/root/.m2");
        s.bind_mount("$CACHE/m2", "/home/build/.m2");
        let mounts = s.effective_mounts(&s.state());
        assert_eq!(mounts.get("/data").map(String::as_str), Some("/second"));
        assert_eq!(
            mounts.get("/cache/m2").map(String::as_str),
            Some("/home/build/.m2")
        );
        assert_eq!(mounts.get("/ws/demo").map(String::as_str), Some("/ws/demo"));
        assert_eq!(mounts.keys().filter(|k| k.as_str() == "/data").count(), 1);
    }

    #[test]
    fn test_expose_docker_and_default_command() {
        let s = session(ContainerSettings {
            expose_docker: true,
            use_image_workdir: true,
            ..Default::default()
        });
        let st = s.state();
        let spec = s.run_spec("alpine:3.6", &st);
        assert_eq!(
            spec.mounts.get(DOCKER_SOCKET).map(String::as_str),
            Some(DOCKER_SOCKET)
        );
        assert_eq!(spec.command, vec![DEFAULT_COMMAND.to_string()]);
        assert_eq!(spec.workdir, None);
        assert_eq!(spec.name, "demo-1");
    }

    #[test]
    fn test_provisioning_requires_enable_and_teardown_is_idempotent() {
        let s = session(ContainerSettings::default());
        let err = s.ensure_provisioned().unwrap_err();
        assert!(matches!(err, ContainerError::NotEnabled { .. }));
        assert_eq!(s.phase(), Phase::Disabled);

        s.enable();
        s.enable();
        assert_eq!(s.phase(), Phase::Enabled);

        // No container was ever started, so neither call touches the runtime.
        s.tear_down().expect("first teardown");
        s.tear_down().expect("second teardown");
        assert_eq!(s.phase(), Phase::TornDown);
        assert!(!s.is_enabled());
        s.enable();
        assert_eq!(s.phase(), Phase::TornDown);
    }

    #[test]
    fn test_contributes_build_vars_only_with_container() {
        let s = session(ContainerSettings::default());
        s.enable();
        let mut env = EnvSnapshot::new();
        s.build_env_vars(&mut env);
        assert!(env.is_empty());

        let mut state = s.state();
        state.container_id = Some("cid123".to_string());
        state.image = Some("alpine:3.6".to_string());
        state.phase = Phase::Provisioned;
        *s.lock() = state;
        s.build_env_vars(&mut env);
        assert_eq!(env.get("BUILD_CONTAINER_ID"), Some("cid123"));
        assert_eq!(env.get("BUILD_DOCKER_IMAGE"), Some("alpine:3.6"));
        assert!(!env.contains_key("BUILD_DOCKER_HOST"));
    }
}
