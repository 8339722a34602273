pub mod server;

use dorsal_core::config::Config;

pub fn config(config: &Config) -> eyre::Result<()> {
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

pub fn version() -> eyre::Result<()> {
    if let Some(version) = dorsal_core::VERSION {
        println!("dorsal: {}", version);
    } else {
        println!("dorsal: [untagged build]")
    }
    Ok(())
}
