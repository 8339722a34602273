use std::path::PathBuf;

/// The dorsal backup coordinator.
#[derive(Debug, clap::Parser)]
#[command(disable_version_flag = true)]
pub struct Cli {
    /// Sets a custom configuration file path
    #[arg(short, long, env = "DORSAL_CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Sets the configuration from a string
    #[arg(long, env = "DORSAL_CONFIG")]
    pub config_string: Option<String>,

    #[command(subcommand)]
    pub subcommand: Cmd,
}

#[derive(Debug, clap::Subcommand)]
pub enum Cmd {
    /// Runs the coordinator server
    Server(server::Cli),

    /// Prints the active configuration
    Config,

    /// Prints version information
    Version,
}

pub mod server {
    use std::path::PathBuf;

    #[derive(Debug, clap::Args)]
    pub struct Cli {
        /// Additionally logs to this file
        #[arg(long)]
        pub log_file: Option<PathBuf>,
    }
}
