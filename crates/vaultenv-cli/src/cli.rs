use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "vaultenv",
    about = "Encrypted namespaces of secrets, injected into a command's environment on demand",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Path to the vault database (overrides the config file).
    #[arg(long, global = true, value_name = "PATH")]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List namespaces.
    List,
    /// Encrypt and store key=value pairs in a namespace.
    Set {
        namespace: String,
        #[arg(required = true, value_name = "KEY=VALUE")]
        pairs: Vec<String>,
    },
    /// Show the keys of a namespace.
    Show {
        /// Print decrypted values as well.
        #[arg(long)]
        decrypt: bool,
        namespace: String,
    },
    /// Remove keys from a namespace.
    Unset {
        namespace: String,
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Delete a namespace and all of its secrets.
    Purge { namespace: String },
    /// Run a command with the secrets of a namespace in its environment.
    Exec {
        /// Do not pass the current environment to the command.
        #[arg(long)]
        insulate: bool,
        /// <NAMESPACE> <COMMAND> [ARGS]...
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version and exit.
    Version,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_set_pairs() {
        let cli = Cli::try_parse_from(["vaultenv", "set", "app", "a=1", "b=2"])
            .expect("parse should succeed");
        assert_eq!(
            cli.command,
            Command::Set {
                namespace: "app".into(),
                pairs: vec!["a=1".into(), "b=2".into()],
            }
        );
    }

    #[test]
    fn exec_keeps_command_flags_for_the_child() {
        let cli = Cli::try_parse_from([
            "vaultenv", "exec", "--insulate", "app", "ls", "-la", "--color",
        ])
        .expect("parse should succeed");
        assert_eq!(
            cli.command,
            Command::Exec {
                insulate: true,
                args: vec!["app".into(), "ls".into(), "-la".into(), "--color".into()],
            }
        );
    }

    #[test]
    fn exec_without_command_still_parses() {
        let cli = Cli::try_parse_from(["vaultenv", "exec", "app"]).expect("parse should succeed");
        assert_eq!(
            cli.command,
            Command::Exec {
                insulate: false,
                args: vec!["app".into()],
            }
        );
    }

    #[test]
    fn parses_global_db_flag() {
        let cli = Cli::try_parse_from(["vaultenv", "list", "--db", "/tmp/v.safe"])
            .expect("parse should succeed");
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/v.safe")));
        assert_eq!(cli.command, Command::List);
    }

    #[test]
    fn parses_config_init_subcommand() {
        let cli =
            Cli::try_parse_from(["vaultenv", "config", "init"]).expect("parse should succeed");
        assert_eq!(cli.command, Command::Config(ConfigCommand::Init));
    }

    #[test]
    fn unset_requires_keys() {
        assert!(Cli::try_parse_from(["vaultenv", "unset", "app"]).is_err());
    }
}
