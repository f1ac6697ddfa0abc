mod cli;
mod cloud;
mod cluster;
mod commands;
mod paths;
mod progress;
mod tasks;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
}

impl Context {
    /// Whether the progress bar is drawn; log output at `-v` and above would tear it.
    pub fn shows_progress(&self) -> bool {
        !self.quiet && self.verbose == 0
    }

    pub fn progress(&self) -> progress::TaskProgress {
        progress::TaskProgress::new(!self.shows_progress())
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
    };

    match cli.command {
        Command::Update(args) => commands::update::run(&ctx, args),
        Command::Plan(args) => commands::plan::run(&ctx, args),
        Command::Completions { shell } => {
            generate(shell, &mut Cli::command(), "cloudup", &mut io::stdout());
            Ok(())
        }
    }
}
