//! Command-line argument helpers.
//!
//! Programs built on strata read their configuration sources from a
//! `--config` flag. These helpers let a caller parse its own argument
//! schema while tolerating that flag even when the schema does not declare
//! it; any other unrecognized flag still errors. Callers that declare their
//! own `--config` argument should parse with plain clap instead.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::{Arg, ArgMatches, Command};

/// The `--config` argument injected into caller schemas.
pub fn config_arg() -> Arg {
    Arg::new("config")
        .long("config")
        .value_name("PATH")
        .num_args(0..)
        .value_parser(clap::value_parser!(PathBuf))
        .help("Configuration source files; consumed by strata")
}

/// Add the `--config` argument to a caller-supplied command.
pub fn with_config_arg(command: Command) -> Command {
    command.arg(config_arg())
}

/// Parse `args` against `command` with `--config` tolerated.
///
/// Returns the matches with the config values removed, plus the extracted
/// config paths, so the caller's own schema never observes the flag.
pub fn parse_tolerant(
    command: Command,
    args: impl IntoIterator<Item = impl Into<OsString> + Clone>,
) -> Result<(ArgMatches, Option<Vec<PathBuf>>), clap::Error> {
    let mut matches = with_config_arg(command).try_get_matches_from(args)?;
    let config = matches
        .remove_many::<PathBuf>("config")
        .map(|values| values.collect::<Vec<_>>())
        .filter(|paths| !paths.is_empty());
    Ok((matches, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::ArgAction;

    fn train_command() -> Command {
        Command::new("train").arg(
            Arg::new("verbose")
                .long("verbose")
                .action(ArgAction::SetTrue),
        )
    }

    #[test]
    fn test_config_tolerated_when_undeclared() {
        let (matches, config) = parse_tolerant(
            train_command(),
            ["train", "--verbose", "--config", "a.cfg", "b.cfg"],
        )
        .unwrap();

        assert!(matches.get_flag("verbose"));
        assert_eq!(
            config,
            Some(vec![PathBuf::from("a.cfg"), PathBuf::from("b.cfg")])
        );
        // The caller's schema never sees the flag.
        assert!(!matches.contains_id("config"));
    }

    #[test]
    fn test_absent_config_is_none() {
        let (_, config) = parse_tolerant(train_command(), ["train", "--verbose"]).unwrap();
        assert!(config.is_none());
    }

    #[test]
    fn test_bare_config_flag_is_none() {
        let (_, config) = parse_tolerant(train_command(), ["train", "--config"]).unwrap();
        assert!(config.is_none());
    }

    #[test]
    fn test_other_unknown_flag_still_errors() {
        let err = parse_tolerant(train_command(), ["train", "--bogus"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }
}
