//! Command-line interface.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use mailhold_core::UserStatus;

/// Self-hosted SMTP, IMAP and POP3 mail server.
#[derive(Debug, Parser)]
#[command(name = "mailhold", version, about)]
pub struct Cli {
    /// Configuration file (defaults to the user config directory).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the SMTP, IMAP and POP3 listeners until interrupted.
    Serve,
    /// Manage user accounts.
    #[command(subcommand)]
    User(UserCommand),
    /// Validate the configuration and print the effective values.
    CheckConfig,
}

#[derive(Debug, Subcommand)]
pub enum UserCommand {
    /// Create a user and its standard mailboxes.
    Add(AddUser),
    /// Change a user's password.
    Passwd {
        /// Primary address.
        email: String,
        /// New password.
        #[arg(long)]
        password: String,
    },
    /// List every account.
    List,
    /// Block logins for a while.
    Lock {
        /// Primary address.
        email: String,
        /// Lock duration.
        #[arg(long, default_value_t = 30)]
        minutes: i64,
    },
    /// Lift a lock and reset the failure counter.
    Unlock {
        /// Primary address.
        email: String,
    },
    /// Set the INBOX quota.
    Quota {
        /// Primary address.
        email: String,
        /// New quota in MiB.
        megabytes: u32,
    },
    /// Change the account status.
    Status {
        /// Primary address.
        email: String,
        /// New status.
        status: StatusArg,
    },
}

#[derive(Debug, Args)]
pub struct AddUser {
    /// Primary address.
    pub email: String,
    /// Login name.
    pub username: String,
    /// Initial password.
    #[arg(long)]
    pub password: String,
    /// Display name.
    #[arg(long, default_value = "")]
    pub full_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StatusArg {
    Active,
    Inactive,
    Suspended,
}

impl From<StatusArg> for UserStatus {
    fn from(status: StatusArg) -> Self {
        match status {
            StatusArg::Active => Self::Active,
            StatusArg::Inactive => Self::Inactive,
            StatusArg::Suspended => Self::Suspended,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_user_add() {
        let cli = Cli::try_parse_from([
            "mailhold",
            "--config",
            "/etc/mailhold.toml",
            "user",
            "add",
            "alice@example.com",
            "alice",
            "--password",
            "wonderland",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("/etc/mailhold.toml")));
        let Commands::User(UserCommand::Add(add)) = cli.command else {
            panic!("expected user add");
        };
        assert_eq!(add.email, "alice@example.com");
        assert_eq!(add.password, "wonderland");
        assert_eq!(add.full_name, "");
    }

    #[test]
    fn test_parse_lock_default() {
        let cli = Cli::try_parse_from(["mailhold", "user", "lock", "bob@example.com"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::User(UserCommand::Lock { minutes: 30, .. })
        ));
    }

    #[test]
    fn test_password_is_required() {
        assert!(Cli::try_parse_from(["mailhold", "user", "passwd", "bob@example.com"]).is_err());
    }
}
