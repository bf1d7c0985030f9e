//! YAML build configuration and build environment assembly.
//!
//! Lookup order for the file: `--config`, then `DOCKER_BUILD_ENV_CONFIG`, then
//! `docker-build-env.yml` in the current directory. Relative paths inside the file are taken
//! relative to the file's directory.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::docker::{container_runtime_path, BuildIdentity, ClientOptions, DockerClient};
use crate::env::{EnvSnapshot, StaticEnv};
use crate::image::ImageSelector;
use crate::session::{BuildContext, ContainerSession, ContainerSettings};
use crate::store::StateStore;
use crate::util::container_name;

pub const DEFAULT_CONFIG_FILE: &str = "docker-build-env.yml";
pub const CONFIG_ENV: &str = "DOCKER_BUILD_ENV_CONFIG";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    pub project: String,
    /// Falls back to `BUILD_NUMBER` from the environment, then 1.
    #[serde(default)]
    pub build_number: Option<u64>,
    #[serde(default)]
    pub workspace: Option<PathBuf>,
    #[serde(default)]
    pub tools_dir: Option<PathBuf>,
    pub selector: ImageSelector,
    #[serde(default)]
    pub docker: ClientOptions,
    #[serde(default)]
    pub container: ContainerSettings,
    /// Contributed variables. Plain keys join the build environment; `KEY+SUFFIX` prepends to
    /// `KEY` inside the container, on top of the container's own value.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub env_file: Option<PathBuf>,
    #[serde(default)]
    pub inherit_env: bool,
    #[serde(default)]
    pub sensitive: Vec<String>,
    #[serde(default)]
    pub state_file: Option<PathBuf>,
    #[serde(default)]
    pub steps: Vec<String>,

    #[serde(skip)]
    base_dir: PathBuf,
}

fn is_path_style(key: &str) -> bool {
    matches!(key.split_once('+'), Some((real, _)) if !real.is_empty())
}

/// Resolve which config file to read.
pub fn config_path(cli: Option<&Path>) -> PathBuf {
    if let Some(p) = cli {
        return p.to_path_buf();
    }
    env::var(CONFIG_ENV)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

impl BuildConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        let base = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        Self::from_yaml(&text, base).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_yaml(text: &str, base_dir: &Path) -> Result<Self> {
        let mut cfg: BuildConfig = serde_yaml::from_str(text)?;
        if cfg.project.trim().is_empty() {
            bail!("project must not be empty");
        }
        if let Some(h) = cfg.docker.host.as_deref().filter(|h| !h.trim().is_empty()) {
            crate::docker::validate_host(h.trim())?;
        }
        cfg.base_dir = base_dir.to_path_buf();
        Ok(cfg)
    }

    /// `~/` is the user's home; other relative paths hang off the config file's directory.
    fn relative(&self, p: &Path) -> PathBuf {
        if let Ok(rest) = p.strip_prefix("~") {
            if let Some(home) = home::home_dir() {
                return home.join(rest);
            }
        }
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.base_dir.join(p)
        }
    }

    pub fn identity(&self) -> BuildIdentity {
        let number = self
            .build_number
            .or_else(|| env::var("BUILD_NUMBER").ok().and_then(|s| s.trim().parse().ok()))
            .unwrap_or(1);
        BuildIdentity {
            project: self.project.clone(),
            number,
        }
    }

    pub fn workspace(&self) -> PathBuf {
        let ws = match self.workspace.as_deref() {
            Some(p) => self.relative(p),
            None => self.base_dir.clone(),
        };
        fs::canonicalize(&ws).unwrap_or(ws)
    }

    pub fn state_file(&self) -> PathBuf {
        match self.state_file.as_deref() {
            Some(p) => self.relative(p),
            None => {
                let id = self.identity();
                self.workspace()
                    .join(".docker-build-env")
                    .join(format!("{}.json", container_name(&id.project, id.number)))
            }
        }
    }

    pub fn store(&self) -> StateStore {
        StateStore::new(self.state_file())
    }

    /// The build's environment: inherited (opt-in), builtins, `env_file`, then plain `env` keys.
    ///
    /// Path-style `KEY+SUFFIX` entries are left to [`BuildConfig::contributed_env`]; applied
    /// here they would replace the container's PATH at `docker run` time.
    pub fn build_env(&self) -> Result<EnvSnapshot> {
        let mut out = EnvSnapshot::new();
        if self.inherit_env {
            for (k, v) in env::vars() {
                out.insert(k, v);
            }
        }
        let id = self.identity();
        out.insert("WORKSPACE", self.workspace().display().to_string());
        out.insert("BUILD_NUMBER", id.number.to_string());
        out.insert("JOB_NAME", id.project.clone());

        if let Some(p) = self.env_file.as_deref() {
            let path = self.relative(p);
            let iter = dotenvy::from_path_iter(&path)
                .with_context(|| format!("cannot read env file {}", path.display()))?;
            for item in iter {
                let (k, v) =
                    item.with_context(|| format!("invalid env file {}", path.display()))?;
                out.override_one(&k, &v);
            }
        }
        for (k, v) in self.env.iter().filter(|(k, _)| !is_path_style(k)) {
            out.override_one(k, v);
        }
        out.resolve();
        out.mark_sensitive(self.sensitive.iter().cloned());
        Ok(out)
    }

    /// Path-style `env` entries, layered over the container baseline on every redirected launch.
    pub fn contributed_env(&self) -> StaticEnv {
        StaticEnv(
            self.env
                .iter()
                .filter(|(k, _)| is_path_style(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    pub fn build_context(&self) -> Result<BuildContext> {
        Ok(BuildContext {
            identity: self.identity(),
            workspace: self.workspace(),
            tmp_dir: env::temp_dir(),
            tools_dir: self.tools_dir.as_deref().map(|p| self.relative(p)),
            env: self.build_env()?,
        })
    }

    /// Runtime client; `verbose` ORs into the configured flag.
    pub fn client(&self, verbose: bool) -> Result<DockerClient> {
        let mut opts = self.docker.clone();
        opts.verbose |= verbose;
        let exe = opts.executable.clone().unwrap_or_default();
        let runtime = container_runtime_path(&exe)?;
        Ok(DockerClient::new(runtime, &opts, self.identity())?)
    }

    /// A session restored from the state file when one exists for this build.
    pub fn session(&self, verbose: bool) -> Result<ContainerSession> {
        let client = self.client(verbose)?;
        let provider = Arc::new(self.selector.clone());
        let build = self.build_context()?;
        let store = self.store();
        Ok(match store.load(&build.identity)? {
            Some(state) => {
                ContainerSession::restore(client, provider, self.container.clone(), build, state)
            }
            None => ContainerSession::new(client, provider, self.container.clone(), build),
        })
    }
}
