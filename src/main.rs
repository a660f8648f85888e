use clap::Parser;
use std::process::ExitCode;

mod banner;
mod cli;
mod commands;
mod doctor;

fn main() -> ExitCode {
    let cli = cli::Cli::parse();
    commands::run(&cli)
}
