use clap::{Args, Parser, Subcommand};

/// CLI surface definition for operating the credential store.
#[derive(Parser, Debug)]
#[command(
    name = "credvault",
    about = "Encrypted credential store for ads-platform app secrets and tenant tokens",
    version,
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print version and exit.
    Version,
    /// Check key material, the envelope codec and the store.
    Health,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Master key utilities.
    #[command(subcommand)]
    Key(KeyCommand),
    /// Global app id and secret.
    #[command(subcommand)]
    App(AppCommand),
    /// Per-tenant access tokens.
    #[command(subcommand)]
    Token(TokenCommand),
    /// Per-tenant business and ad account selection.
    #[command(subcommand)]
    Selection(SelectionCommand),
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum KeyCommand {
    /// Print a fresh random master secret.
    Generate,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum AppCommand {
    /// Store the app id and secret, replacing any previous value.
    Set {
        #[arg(long)]
        app_id: String,
        #[arg(long)]
        app_secret: String,
    },
    /// Show the stored app config.
    Show {
        /// Print the secret instead of masking it.
        #[arg(long)]
        reveal: bool,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum TokenCommand {
    /// Store an access token for a tenant.
    Set {
        tenant: String,
        #[arg(long)]
        access_token: String,
        #[arg(long)]
        token_type: Option<String>,
        /// Seconds until the token expires.
        #[arg(long, allow_negative_numbers = true)]
        expires_in: i64,
    },
    /// Show a tenant's token, if present and not expired.
    Show {
        tenant: String,
        #[arg(long)]
        reveal: bool,
    },
    /// Forget a tenant's token.
    Clear { tenant: String },
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct SelectionArgs {
    #[arg(long)]
    pub ad_account_id: String,
    #[arg(long)]
    pub business_id: Option<String>,
    #[arg(long)]
    pub currency: Option<String>,
    #[arg(long)]
    pub timezone: Option<String>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum SelectionCommand {
    /// Store a tenant's selection.
    Set {
        tenant: String,
        #[command(flatten)]
        selection: SelectionArgs,
    },
    /// Show a tenant's selection.
    Show { tenant: String },
}
