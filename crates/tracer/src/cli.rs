//! Command-line interface for the tracer.
//!
//! Every flag overrides the matching setting from the configuration file.

use clap::{Arg, ArgMatches, Command};
use std::ffi::OsString;
use std::path::PathBuf;

pub const DEFAULT_CONFIG_PATH: &str = "tracer.toml";

/// Command line arguments parsed from user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    /// Path to the process configuration file
    pub config_path: PathBuf,
    /// Optional override for the targets file
    pub targets_path: Option<PathBuf>,
    /// Optional override for the data directory
    pub data_dir: Option<PathBuf>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
}

impl CliArgs {
    pub fn command() -> Command {
        Command::new("tracer")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Tails DayZ ADM logs over FTP and records player movement tracks")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path")
                    .default_value(DEFAULT_CONFIG_PATH),
            )
            .arg(
                Arg::new("targets")
                    .short('t')
                    .long("targets")
                    .value_name("FILE")
                    .help("Targets file path ([targets.<id>] tables)"),
            )
            .arg(
                Arg::new("data-dir")
                    .short('d')
                    .long("data-dir")
                    .value_name("DIR")
                    .help("Directory for poll state, mirrors and tracks"),
            )
            .arg(
                Arg::new("log-level")
                    .short('l')
                    .long("log-level")
                    .value_name("LEVEL")
                    .help("Log level (trace, debug, info, warn, error)"),
            )
            .arg(
                Arg::new("json-logs")
                    .long("json-logs")
                    .help("Output logs in JSON format")
                    .action(clap::ArgAction::SetTrue),
            )
    }

    /// Parses the process arguments, exiting with usage on error.
    ///
    /// # Returns
    ///
    /// A `CliArgs` with the config path (defaulting to `tracer.toml`) and
    /// whichever overrides were given.
    pub fn parse() -> Self {
        Self::from_matches(&Self::command().get_matches())
    }

    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Ok(Self::from_matches(&Self::command().try_get_matches_from(args)?))
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH)),
            targets_path: matches.get_one::<String>("targets").map(PathBuf::from),
            data_dir: matches.get_one::<String>("data-dir").map(PathBuf::from),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = CliArgs::try_parse_from(["tracer"]).expect("parse");
        assert_eq!(args.config_path, PathBuf::from("tracer.toml"));
        assert_eq!(args.targets_path, None);
        assert_eq!(args.data_dir, None);
        assert!(!args.json_logs);
    }

    #[test]
    fn test_overrides() {
        let args = CliArgs::try_parse_from([
            "tracer",
            "-c",
            "/etc/tracer.toml",
            "--targets",
            "t.toml",
            "--data-dir",
            "/var/lib/tracer",
            "--log-level",
            "debug",
            "--json-logs",
        ])
        .expect("parse");
        assert_eq!(args.config_path, PathBuf::from("/etc/tracer.toml"));
        assert_eq!(args.targets_path, Some(PathBuf::from("t.toml")));
        assert_eq!(args.data_dir, Some(PathBuf::from("/var/lib/tracer")));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.json_logs);
    }

    #[test]
    fn test_unknown_flag_rejected() {
        assert!(CliArgs::try_parse_from(["tracer", "--bind", "x"]).is_err());
    }
}
