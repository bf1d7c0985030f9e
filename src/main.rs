use std::process::ExitCode;

use clap::Parser;

mod cli;
mod commands;
mod doctor;

use cli::{Cli, Command};

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Some(mode) = cli.color {
        docker_build_env::set_color_mode(mode);
    }
    docker_build_env::telemetry_init();

    let result = match &cli.command {
        Command::Doctor => {
            doctor::run_doctor(&cli);
            Ok(ExitCode::SUCCESS)
        }
        Command::Setup => commands::run_setup(&cli),
        Command::Exec { cmd } => commands::run_exec(&cli, cmd),
        Command::Teardown => commands::run_teardown(&cli),
        Command::Run => commands::run_steps(&cli),
        Command::Images { json } => commands::run_images(&cli, *json),
    };
    match result {
        Ok(code) => code,
        Err(e) => commands::report(&e),
    }
}
