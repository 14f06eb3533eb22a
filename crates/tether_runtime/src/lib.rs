//! Tether host runtime
//!
//! Command-line host around `tether_script`: parses arguments, installs the
//! embedding config and drives a single context.

pub mod cli;
pub mod host;
pub mod json;

pub use cli::{Cli, Command};
pub use host::Host;
