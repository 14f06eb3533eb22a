//! Tether Runtime
//!
//! Binary entry point: parses arguments, configures logging and the
//! embedding layer, then runs one command.

use anyhow::{anyhow, Context as _, Result};
use clap::Parser;
use tether_runtime::{json, Cli, Command, Host};
use tether_script::{config, Config, Native};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log)?)
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("could not read {}", path.display()))?;
            Config::from_json(&text).with_context(|| format!("invalid config {}", path.display()))?
        }
        None => Config::default(),
    };
    config::install(config).map_err(|_| anyhow!("embedding config was already installed"))?;

    let mut host = Host::new(config::current().clone())?;
    let result = match &cli.command {
        Command::Run { file } => host.eval_file(file)?,
        Command::Eval { code } => host.eval(code)?,
        Command::Exec { bytecode } => host.exec_file(bytecode)?,
        Command::Compile { file, output } => {
            host.compile_file(file, output)?;
            Native::Null
        }
    };
    if !result.is_null() {
        println!("{}", json::to_json(&result));
    }
    host.free();

    Ok(())
}
