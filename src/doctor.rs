use std::env;
use std::process::{Command, Stdio};

use docker_build_env::{
    color_enabled_stderr, config_path, container_runtime_path, paint, ImageProvider, JobRef,
};

use crate::cli::Cli;
use crate::commands::load_config;

fn value(use_color: bool, s: &str) -> String {
    paint(use_color, "\x1b[34;1m", s)
}

pub(crate) fn run_doctor(cli: &Cli) {
    let use_color = color_enabled_stderr();
    eprintln!("docker-build-env doctor");
    eprintln!();
    eprintln!("  version: v{}", env!("CARGO_PKG_VERSION"));
    eprintln!(
        "  build:   {} ({}, {})",
        env!("DOCKER_BUILD_ENV_BUILD_DATE"),
        env!("DOCKER_BUILD_ENV_BUILD_TARGET"),
        env!("DOCKER_BUILD_ENV_BUILD_PROFILE")
    );
    eprintln!(
        "  host:    {} / {}",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    eprintln!();

    let path = config_path(cli.config.as_deref());
    let cfg = match load_config(cli) {
        Ok(c) => {
            eprintln!("  config:     {}", value(use_color, &path.display().to_string()));
            Some(c)
        }
        Err(e) => {
            eprintln!("  config:     {} ({e:#})", path.display());
            None
        }
    };

    let exe = cfg
        .as_ref()
        .and_then(|c| c.docker.executable.clone())
        .unwrap_or_default();
    match container_runtime_path(&exe) {
        Ok(p) => {
            eprintln!("  docker:     {}", value(use_color, &p.display().to_string()));
            if let Ok(out) = Command::new(&p)
                .arg("--version")
                .stderr(Stdio::null())
                .output()
            {
                let s = String::from_utf8_lossy(&out.stdout).trim().to_string();
                if !s.is_empty() {
                    eprintln!("  docker --version: {s}");
                }
            }
        }
        Err(e) => eprintln!("  docker:     not found ({e})"),
    }

    let Some(cfg) = cfg else {
        eprintln!();
        eprintln!("doctor: completed diagnostics.");
        return;
    };

    let id = cfg.identity();
    eprintln!(
        "  docker host: {}",
        cfg.docker.host.as_deref().unwrap_or("(default)")
    );
    eprintln!("  project:    {} #{}", id.project, id.number);
    eprintln!("  workspace:  {}", cfg.workspace().display());

    let workspace = cfg.workspace();
    let images = cfg.selector.images_used_by_job(JobRef {
        name: &cfg.project,
        workspace: &workspace,
    });
    let shown = if images.is_empty() {
        "(built from Dockerfile)".to_string()
    } else {
        images.into_iter().collect::<Vec<_>>().join(", ")
    };
    eprintln!("  images:     {}", value(use_color, &shown));

    let store = cfg.store();
    match store.load(&id) {
        Ok(Some(state)) => eprintln!(
            "  session:    {:?} container={} ({})",
            state.phase,
            state.container_id.as_deref().unwrap_or("-"),
            store.path().display()
        ),
        Ok(None) => eprintln!("  session:    none ({})", store.path().display()),
        Err(e) => eprintln!("  session:    unreadable ({e})"),
    }
    if env::var("NO_COLOR").is_ok() {
        eprintln!("  color:      disabled by NO_COLOR");
    }
    eprintln!();
    eprintln!("doctor: completed diagnostics.");
}
