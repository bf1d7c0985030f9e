use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "docker-build-env",
    version,
    about = "Run every step of a build inside one ephemeral Docker container"
)]
pub(crate) struct Cli {
    /// Build configuration file (default: docker-build-env.yml, or DOCKER_BUILD_ENV_CONFIG)
    #[arg(long, global = true)]
    pub(crate) config: Option<PathBuf>,

    /// Echo and stream every docker invocation, including quiet ones
    #[arg(long, short = 'v', global = true)]
    pub(crate) verbose: bool,

    /// Colorize output: auto|always|never
    #[arg(long = "color", value_enum, global = true)]
    pub(crate) color: Option<docker_build_env::ColorMode>,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub(crate) enum Command {
    /// Resolve the image and start the build container now
    Setup,

    /// Run a command inside the build container (starting it on first use)
    Exec {
        /// Command and arguments
        #[arg(
            trailing_var_arg = true,
            allow_hyphen_values = true,
            required = true,
            value_name = "CMD"
        )]
        cmd: Vec<String>,
    },

    /// Stop and remove the build container
    Teardown,

    /// Set up, run every configured step in the container, then always tear down
    Run,

    /// List images referenced by the build configuration
    Images {
        /// Emit machine-readable JSON
        #[arg(long)]
        json: bool,
    },

    /// Show runtime, configuration and session diagnostics
    Doctor,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_exec_takes_trailing_args_verbatim() {
        let cli = Cli::try_parse_from([
            "docker-build-env",
            "--verbose",
            "exec",
            "--",
            "mvn",
            "-B",
            "verify",
        ])
        .expect("parse");
        assert!(cli.verbose);
        match cli.command {
            Command::Exec { cmd } => assert_eq!(cmd, vec!["mvn", "-B", "verify"]),
            other => panic!("unexpected {other:?}"),
        }
    }
}
