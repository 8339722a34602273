use clap::Parser;
use dirs_next as dirs;
use dorsal_core::config::Config;
use std::path::PathBuf;

mod cli;
mod commands;

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("dorsal").join("server.toml"))
}

fn load_config(args: &cli::Cli) -> eyre::Result<Config> {
    if let Some(config_string) = &args.config_string {
        Ok(Config::parse(config_string)?)
    } else if let Some(path) = &args.config_file {
        Ok(Config::parse_file(path)?)
    } else {
        match default_config_path() {
            Some(path) if path.exists() => Ok(Config::parse_file(&path)?),
            _ => Ok(Config::default()),
        }
    }
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let args = cli::Cli::parse();
    let config = load_config(&args)?;

    match args.subcommand {
        cli::Cmd::Server(server_args) => tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?
            .block_on(commands::server::run(server_args, config)),
        cli::Cmd::Config => commands::config(&config),
        cli::Cmd::Version => commands::version(),
    }
}
