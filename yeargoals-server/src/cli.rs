use clap::{Parser, Subcommand};

const HELP_EPILOG: &str = r#"Server options can also be provided via environment variables:
  CONFIG_PATH (default: ./config.yaml)
  DB_PATH     (default: data/goals.db)
  PORT        (default: 5160 or config.listen_port)

Use `hash-password` to generate the bcrypt hash that goes into the
config file's password_hash field.
"#;

#[derive(Debug, Parser)]
#[command(
    name = "yeargoals-server",
    version,
    about = "YearGoals server",
    long_about = None,
    after_long_help = HELP_EPILOG,
)]
pub struct Cli {
    /// Optional subcommand. Without one, runs the server.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the bcrypt hash of a password for use in config.yaml
    HashPassword {
        /// The shared password to hash
        password: String,
    },
}
