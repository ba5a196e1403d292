//! Flag surface. Everything is validated here, before any credential or
//! network work happens, so misuse fails fast with a usage error.

use std::path::PathBuf;

use clap::Parser;

/// Rolecall - Enumerate IAM principal ARNs without credentials in the target
/// account by probing resource-policy validation in your own.
#[deny(missing_docs)]
#[derive(Parser, Debug)]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct CommandLineArgs {
    /// AWS credential profile used for probing
    #[arg(long, default_value = "")]
    pub profile: String,

    /// Name of the scan; cache state is kept per name
    #[arg(long, default_value = "default")]
    pub name: String,

    /// Inline comma-separated target account IDs
    #[arg(long, default_value = "")]
    pub accounts: String,

    /// File of target account IDs, one per line (`#` comments allowed)
    #[arg(long = "account-list", value_name = "FILE")]
    pub account_list: Vec<PathBuf>,

    /// Role template files or directories of `*.list` files, comma-separated
    #[arg(long, value_name = "PATH", value_delimiter = ',')]
    pub roles: Vec<PathBuf>,

    /// Ignore cached results; probe everything and rewrite the cache
    #[arg(long, default_value_t = false)]
    pub force: bool,

    /// Global probe budget in requests per second
    #[arg(long = "rate-limit", default_value_t = 100,
          value_parser = clap::value_parser!(u16).range(1..=1000))]
    pub rate_limit: u16,

    /// Provision probe resources in every region, then exit
    #[arg(long, default_value_t = false)]
    pub setup: bool,

    /// Tear probe resources down, then exit
    #[arg(long, default_value_t = false, conflicts_with = "setup")]
    pub clean: bool,

    /// Enable debug logging
    #[arg(long, default_value_t = false)]
    pub debug: bool,
}

impl CommandLineArgs {
    /// Parse and cross-validate the command line.
    pub fn parse_args() -> Self {
        let args = CommandLineArgs::parse();
        if let Err(message) = args.validate() {
            clap::Error::raw(clap::error::ErrorKind::InvalidValue, format!("{message}\n"))
                .exit();
        }
        args
    }

    /// Checks that span more than one flag; single-flag constraints live on
    /// the derive attributes.
    pub fn validate(&self) -> Result<(), String> {
        let scanning = !self.setup && !self.clean;
        if scanning && self.roles.is_empty() {
            return Err("scanning requires --roles (see --help)".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use clap::error::ErrorKind;

    use super::*;

    fn try_parse(argv: &[&str]) -> Result<CommandLineArgs, clap::Error> {
        CommandLineArgs::try_parse_from(argv)
    }

    #[test]
    fn defaults() {
        let args = try_parse(&["rolecall", "--roles", "roles.list"]).unwrap();
        assert_eq!(args.name, "default");
        assert_eq!(args.rate_limit, 100);
        assert!(!args.force);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn rate_limit_range_is_enforced() {
        for bad in ["0", "1001"] {
            let err = try_parse(&["rolecall", "--rate-limit", bad]).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ValueValidation);
        }
        assert!(try_parse(&["rolecall", "--rate-limit", "1000", "--roles", "r.list"]).is_ok());
    }

    #[test]
    fn setup_and_clean_are_mutually_exclusive() {
        let err = try_parse(&["rolecall", "--setup", "--clean"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArgumentConflict);
    }

    #[test]
    fn roles_split_on_commas() {
        let args = try_parse(&["rolecall", "--roles", "a.list,dir/b"]).unwrap();
        assert_eq!(args.roles, vec![PathBuf::from("a.list"), PathBuf::from("dir/b")]);
    }

    #[test]
    fn scan_without_roles_is_rejected_but_lifecycle_actions_pass() {
        let args = try_parse(&["rolecall"]).unwrap();
        assert!(args.validate().is_err());

        let args = try_parse(&["rolecall", "--setup"]).unwrap();
        assert!(args.validate().is_ok());
        let args = try_parse(&["rolecall", "--clean"]).unwrap();
        assert!(args.validate().is_ok());
    }
}
