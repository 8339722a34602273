use crate::cli;
use dorsal_core::config::Config;
use dorsal_server::{server, service::Services};
use std::path::PathBuf;

fn setup_logger(log_file: Option<&PathBuf>) -> eyre::Result<()> {
    use tracing::Level;
    use tracing_subscriber::{
        filter::LevelFilter,
        fmt::{format::FmtSpan, layer, time::LocalTime},
        layer::SubscriberExt,
        util::SubscriberInitExt,
        Registry,
    };

    let builder = Registry::default()
        .with(LevelFilter::from(Level::INFO))
        .with(layer().with_ansi(true).with_target(false).without_time());

    if let Some(log_file) = log_file {
        let time_format = time::macros::format_description!(
            "[year]-[month]-[day] [hour repr:24]:[minute]:[second][offset_hour sign:mandatory]:[offset_minute]"
        );

        let file = std::fs::File::options()
            .append(true)
            .create(true)
            .open(log_file)?;
        builder
            .with(
                layer()
                    .with_ansi(false)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_timer(LocalTime::new(time_format))
                    .with_writer(file),
            )
            .try_init()?;
    } else {
        builder.try_init()?;
    }

    Ok(())
}

pub async fn run(args: cli::server::Cli, config: Config) -> eyre::Result<()> {
    setup_logger(args.log_file.as_ref())?;

    let instance_name = hostname::get()?.to_string_lossy().into_owned();
    tracing::info!("instance name: {}", instance_name);
    if let Some(version) = dorsal_core::VERSION {
        tracing::info!("dorsal: {}", version);
    }

    server::run(config, Services::in_memory()).await
}
