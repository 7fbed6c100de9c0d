use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use modkit_cli::cli::{Cli, Command};
use modkit_cli::commands;
use modkit_cli::logging::{Logger, init_subscriber};

fn main() -> Result<()> {
    let _ = enable_ansi_support::enable_ansi_support();
    let args = Cli::parse();

    let command = match &args.command {
        Command::Install(_) => "install",
        Command::Uninstall(_) => "uninstall",
        Command::Status(_) => "status",
        Command::List => "list",
        Command::Completions { shell } => {
            commands::completions::run(*shell);
            return Ok(());
        }
        Command::Version => {
            commands::version::run();
            return Ok(());
        }
    };
    init_subscriber(args.verbose, command);
    let log = Arc::new(Logger::new(command));

    match &args.command {
        Command::Install(opts) => commands::install::run(&args.global, opts, args.verbose, &log),
        Command::Uninstall(opts) => commands::uninstall::run(&args.global, opts, &log),
        Command::Status(opts) => commands::status::run(&args.global, opts, &log),
        Command::List => commands::list::run(&args.global, &log),
        Command::Completions { .. } | Command::Version => Ok(()),
    }
}
