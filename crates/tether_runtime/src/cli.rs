//! Command-line arguments

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(version)]
#[command(about = "Run scripts and bytecode in an embedded QuickJS context", long_about = None)]
pub struct Cli {
    /// JSON file with the embedding configuration
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log filter (`info`, `tether_script=debug`, ...)
    #[arg(long, global = true, default_value = "warn")]
    pub log: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Evaluate a script file and print its result as JSON
    Run { file: PathBuf },

    /// Evaluate inline source and print its result as JSON
    Eval { code: String },

    /// Compile a script file to bytecode
    Compile {
        file: PathBuf,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Run a bytecode file and print its result as JSON
    Exec { bytecode: PathBuf },
}
