//! Image Provider strategies: pull a named image or build one from a Dockerfile.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
#[cfg(feature = "otel")]
use tracing::instrument;

use crate::docker::DockerClient;
use crate::env::EnvSnapshot;
use crate::errors::{logged, ContainerError};

/// Inputs shared by every strategy when resolving an image.
pub struct ResolveContext<'a> {
    pub client: &'a DockerClient,
    /// Build environment used to expand `$VAR` references in selector fields.
    pub env: &'a EnvSnapshot,
    pub workspace: &'a Path,
    pub force_pull: bool,
    pub no_cache: bool,
}

/// Identifies a job for the image inventory query.
#[derive(Debug, Clone, Copy)]
pub struct JobRef<'a> {
    pub name: &'a str,
    pub workspace: &'a Path,
}

pub trait ImageProvider: Send + Sync {
    /// Produce a ready-to-run image reference.
    fn resolve(&self, ctx: &ResolveContext<'_>) -> Result<String, ContainerError>;

    /// Image names statically referable by the job's configuration (possibly empty).
    fn images_used_by_job(&self, job: JobRef<'_>) -> BTreeSet<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ImageSelector {
    Pull(PullImage),
    Dockerfile(DockerfileImage),
}

impl ImageSelector {
    pub fn provider(&self) -> &dyn ImageProvider {
        match self {
            ImageSelector::Pull(p) => p,
            ImageSelector::Dockerfile(d) => d,
        }
    }
}

impl ImageProvider for ImageSelector {
    fn resolve(&self, ctx: &ResolveContext<'_>) -> Result<String, ContainerError> {
        self.provider().resolve(ctx)
    }

    fn images_used_by_job(&self, job: JobRef<'_>) -> BTreeSet<String> {
        self.provider().images_used_by_job(job)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PullImage {
    pub image: String,
}

impl ImageProvider for PullImage {
    #[cfg_attr(feature = "otel", instrument(level = "info", skip(self, ctx), fields(image = %self.image), err))]
    fn resolve(&self, ctx: &ResolveContext<'_>) -> Result<String, ContainerError> {
        let image = ctx.env.expand(&self.image);
        if !ctx.force_pull {
            if ctx.client.image_exists(&image)? {
                return Ok(image);
            }
            let _ = logged(ContainerError::ImageNotFound {
                image: image.clone(),
            });
        }
        let use_err = crate::color::color_enabled_stderr();
        crate::color::log_info_stderr(
            use_err,
            &format!("docker-build-env: pulling docker image {image}"),
        );
        if !ctx.client.pull_image(&image)? {
            return Err(logged(ContainerError::ImagePullFailed { image }));
        }
        Ok(image)
    }

    fn images_used_by_job(&self, _job: JobRef<'_>) -> BTreeSet<String> {
        BTreeSet::from([self.image.clone()])
    }
}

fn default_context() -> String {
    ".".to_string()
}

fn default_dockerfile() -> String {
    "Dockerfile".to_string()
}

/// Build from `<workspace>/<context>/<dockerfile>`. The runtime's layer cache is the only cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DockerfileImage {
    #[serde(default = "default_context")]
    pub context: String,
    #[serde(default = "default_dockerfile")]
    pub dockerfile: String,
}

impl DockerfileImage {
    fn paths(&self, workspace: &Path, env: Option<&EnvSnapshot>) -> (PathBuf, PathBuf) {
        let expand = |s: &str| env.map(|e| e.expand(s)).unwrap_or_else(|| s.to_string());
        let context = workspace.join(expand(&self.context));
        let dockerfile = context.join(expand(&self.dockerfile));
        (context, dockerfile)
    }
}

impl ImageProvider for DockerfileImage {
    #[cfg_attr(feature = "otel", instrument(level = "info", skip(self, ctx), fields(context = %self.context), err))]
    fn resolve(&self, ctx: &ResolveContext<'_>) -> Result<String, ContainerError> {
        let (context, dockerfile) = self.paths(ctx.workspace, Some(ctx.env));
        let use_err = crate::color::color_enabled_stderr();
        crate::color::log_info_stderr(
            use_err,
            &format!(
                "docker-build-env: building docker image from {}",
                dockerfile.display()
            ),
        );
        ctx.client
            .build_image(&context, &dockerfile, ctx.force_pull, ctx.no_cache)
    }

    fn images_used_by_job(&self, job: JobRef<'_>) -> BTreeSet<String> {
        let (_, dockerfile) = self.paths(job.workspace, None);
        fs::read_to_string(dockerfile)
            .map(|text| parse_from_images(&text))
            .unwrap_or_default()
    }
}

/// Base images named by `FROM` lines, excluding `scratch` and earlier build stages.
pub fn parse_from_images(dockerfile: &str) -> BTreeSet<String> {
    let mut stages: BTreeSet<String> = BTreeSet::new();
    let mut images = BTreeSet::new();
    for line in dockerfile.lines() {
        let mut toks = line.split_whitespace();
        match toks.next() {
            Some(kw) if kw.eq_ignore_ascii_case("FROM") => {}
            _ => continue,
        }
        let rest: Vec<&str> = toks.filter(|t| !t.starts_with("--")).collect();
        let Some(image) = rest.first() else {
            continue;
        };
        if !image.eq_ignore_ascii_case("scratch") && !stages.contains(&image.to_ascii_lowercase()) {
            images.insert((*image).to_string());
        }
        if rest.len() >= 3 && rest[1].eq_ignore_ascii_case("AS") {
            stages.insert(rest[2].to_ascii_lowercase());
        }
    }
    images
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_yaml_is_tagged() {
        let sel: ImageSelector = serde_yaml::from_str("type: pull\nimage: alpine:3.6\n").expect("yaml");
        assert_eq!(
            sel,
            ImageSelector::Pull(PullImage {
                image: "alpine:3.6".to_string()
            })
        );
        let sel: ImageSelector = serde_yaml::from_str("type: dockerfile\ncontext: docker\n").expect("yaml");
        assert_eq!(
            sel,
            ImageSelector::Dockerfile(DockerfileImage {
                context: "docker".to_string(),
                dockerfile: "Dockerfile".to_string()
            })
        );
    }

    #[test]
    fn test_parse_from_images_skips_stages_and_scratch() {
        let df = "\
# syntax=docker/dockerfile:1
FROM --platform=linux/amd64 rust:1.80 AS builder
RUN cargo build
from builder AS tester
FROM scratch
FROM alpine:3.6
";
        let got: Vec<String> = parse_from_images(df).into_iter().collect();
        assert_eq!(got, vec!["alpine:3.6".to_string(), "rust:1.80".to_string()]);
    }

    #[test]
    fn test_inventory() {
        let td = tempfile::tempdir().expect("tmpdir");
        let job = JobRef {
            name: "demo",
            workspace: td.path(),
        };
        let pull = PullImage {
            image: "maven:3".to_string(),
        };
        assert_eq!(pull.images_used_by_job(job), BTreeSet::from(["maven:3".to_string()]));

        let df = DockerfileImage {
            context: ".".to_string(),
            dockerfile: "Dockerfile".to_string(),
        };
        assert!(df.images_used_by_job(job).is_empty());
        std::fs::write(td.path().join("Dockerfile"), "FROM debian:12\n").expect("write");
        assert_eq!(df.images_used_by_job(job), BTreeSet::from(["debian:12".to_string()]));
    }
}
