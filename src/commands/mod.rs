use std::io;
use std::process::{ExitCode, ExitStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
#[cfg(unix)]
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

use docker_build_env::{
    color_enabled_stderr, config_path, exit_code_for_error, log_error_stderr, log_info_stderr,
    log_warn_stderr, BuildConfig, ContainerError, ContainerSession, DockerRedirector, ImageProvider,
    JobRef, Launcher, LocalLauncher, Phase, ProcStarter, StateStore,
};

use crate::cli::Cli;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

#[cfg(unix)]
extern "C" fn handle_interrupt(_sig: i32) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Keep this process alive on SIGINT/SIGTERM/SIGHUP so teardown still runs.
/// Children get default dispositions back on exec.
#[cfg(unix)]
fn install_signal_handlers() {
    let act = SigAction::new(
        SigHandler::Handler(handle_interrupt),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    unsafe {
        let _ = signal::sigaction(Signal::SIGINT, &act);
        let _ = signal::sigaction(Signal::SIGTERM, &act);
        let _ = signal::sigaction(Signal::SIGHUP, &act);
    }
}

#[cfg(not(unix))]
fn install_signal_handlers() {}

pub(crate) fn load_config(cli: &Cli) -> Result<BuildConfig> {
    BuildConfig::load(&config_path(cli.config.as_deref()))
}

/// Map a top-level failure to an exit code, logging it once.
pub(crate) fn report(e: &anyhow::Error) -> ExitCode {
    let code = e
        .chain()
        .find_map(|c| {
            if let Some(ce) = c.downcast_ref::<ContainerError>() {
                return Some(exit_code_for_error(ce));
            }
            c.downcast_ref::<io::Error>().map(|ioe| {
                ioe.get_ref()
                    .and_then(|inner| inner.downcast_ref::<ContainerError>())
                    .map(exit_code_for_error)
                    .unwrap_or_else(|| docker_build_env::exit_code_for_io_error(ioe))
            })
        })
        .unwrap_or(1);
    log_error_stderr(
        color_enabled_stderr(),
        &format!("docker-build-env: error: {e:#}"),
    );
    ExitCode::from(code)
}

fn exit_code_for_status(status: ExitStatus) -> ExitCode {
    match status.code() {
        Some(c) => ExitCode::from(u8::try_from(c).unwrap_or(1)),
        None => ExitCode::from(1),
    }
}

/// Run `f` on the build's session while holding the state lock, then persist the state
/// whether or not `f` succeeded.
fn with_session<T>(
    cfg: &BuildConfig,
    verbose: bool,
    f: impl FnOnce(&ContainerSession) -> Result<T, ContainerError>,
) -> Result<(ContainerSession, T)> {
    let store: StateStore = cfg.store();
    let _lock = store.lock()?;
    let session = cfg.session(verbose)?;
    let out = f(&session);
    let saved = store.save(&session.build().identity, &session.state());
    let value = out?;
    saved?;
    Ok((session, value))
}

pub(crate) fn run_setup(cli: &Cli) -> Result<ExitCode> {
    let cfg = load_config(cli)?;
    let (_, id) = with_session(&cfg, cli.verbose, |s| s.setup())?;
    println!("{id}");
    Ok(ExitCode::SUCCESS)
}

pub(crate) fn run_exec(cli: &Cli, cmd: &[String]) -> Result<ExitCode> {
    let cfg = load_config(cli)?;
    let (session, _) = with_session(&cfg, cli.verbose, |s| {
        if s.phase() == Phase::TornDown {
            return Err(ContainerError::NotEnabled {
                image: s.image().unwrap_or_else(|| "<unresolved>".to_string()),
            });
        }
        // A step is running, so checkout is over.
        s.enable();
        s.ensure_provisioned()
    })?;
    let session = Arc::new(session);
    let status = launch_in(&cfg, &session, ProcStarter::new(cmd.iter().cloned()))?;
    Ok(exit_code_for_status(status))
}

fn launch_in(
    cfg: &BuildConfig,
    session: &Arc<ContainerSession>,
    starter: ProcStarter,
) -> Result<ExitStatus> {
    let redirector = DockerRedirector::new(Arc::new(LocalLauncher), Arc::clone(session))
        .with_contributor(Arc::new(cfg.contributed_env()));
    let starter = starter.envs(session.build().env.clone());
    Ok(redirector.launch(starter)?.join()?)
}

pub(crate) fn run_teardown(cli: &Cli) -> Result<ExitCode> {
    let cfg = load_config(cli)?;
    let (session, _) = with_session(&cfg, cli.verbose, |s| s.tear_down())?;
    if session.container_id().is_none() {
        log_info_stderr(
            color_enabled_stderr(),
            "docker-build-env: no container to tear down",
        );
    }
    Ok(ExitCode::SUCCESS)
}

pub(crate) fn run_steps(cli: &Cli) -> Result<ExitCode> {
    let cfg = load_config(cli)?;
    if cfg.steps.is_empty() {
        bail!("no steps configured");
    }
    install_signal_handlers();
    let use_err = color_enabled_stderr();

    let setup = with_session(&cfg, cli.verbose, |s| s.setup());
    let outcome: Result<ExitCode> = match setup {
        Err(e) => Err(e),
        Ok((session, _)) => {
            let session = Arc::new(session);
            let mut code = ExitCode::SUCCESS;
            let mut failure = None;
            for (i, step) in cfg.steps.iter().enumerate() {
                if INTERRUPTED.load(Ordering::SeqCst) {
                    code = ExitCode::from(130);
                    break;
                }
                log_info_stderr(
                    use_err,
                    &format!("docker-build-env: step {}/{}: {step}", i + 1, cfg.steps.len()),
                );
                let starter = ProcStarter::new(["/bin/sh", "-c", step.as_str()]);
                match launch_in(&cfg, &session, starter) {
                    Ok(status) if status.success() => {}
                    Ok(status) => {
                        log_warn_stderr(
                            use_err,
                            &format!("docker-build-env: step {} failed ({status})", i + 1),
                        );
                        code = exit_code_for_status(status);
                        break;
                    }
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
            match failure {
                Some(e) => Err(e),
                None => Ok(code),
            }
        }
    };

    let teardown = with_session(&cfg, cli.verbose, |s| s.tear_down());
    match (outcome, teardown) {
        (Ok(code), Ok(_)) => Ok(code),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(_)) => Err(e),
        (Err(e), Err(t)) => {
            log_error_stderr(use_err, &format!("docker-build-env: teardown: {t:#}"));
            Err(e)
        }
    }
}

pub(crate) fn run_images(cli: &Cli, json: bool) -> Result<ExitCode> {
    let cfg = load_config(cli)?;
    let workspace = cfg.workspace();
    let images = cfg.selector.images_used_by_job(JobRef {
        name: &cfg.project,
        workspace: &workspace,
    });
    if json {
        println!("{}", serde_json::to_string(&images)?);
    } else {
        for image in &images {
            println!("{image}");
        }
    }
    Ok(ExitCode::SUCCESS)
}
