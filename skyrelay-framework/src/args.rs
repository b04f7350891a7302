//! CLI argument parsing for relay binaries.

use std::path::PathBuf;

use clap::{CommandFactory, FromArgMatches, Parser};

/// Common CLI arguments for all relay binaries.
#[derive(Parser, Debug, Clone)]
#[command(about = "SkyRelay telemetry relay")]
pub struct RelayArgs {
    /// Path to configuration file.
    #[arg(short, long)]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,
}

impl RelayArgs {
    /// Parse CLI arguments with a default config path.
    ///
    /// If no `--config` argument is provided, uses the default.
    pub fn parse_with_default(default_config: &'static str) -> Self {
        parse_with_default_config(default_config)
    }

    /// Parse CLI arguments (requires --config to be specified).
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}

/// Parse any argument struct that embeds [`RelayArgs`] (via
/// `#[command(flatten)]`), defaulting `--config` to `default_config`.
pub fn parse_with_default_config<T: Parser>(default_config: &'static str) -> T {
    let matches = T::command()
        .mut_arg("config", |arg| arg.default_value(default_config))
        .get_matches();

    match T::from_arg_matches(&matches) {
        Ok(args) => args,
        Err(e) => e.exit(),
    }
}
