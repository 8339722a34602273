use crate::shutdown::Shutdown;

#[derive(Debug)]
pub struct SignalHandler {
    shutdown: Shutdown,
}

impl SignalHandler {
    pub fn new(shutdown: Shutdown) -> Self {
        SignalHandler { shutdown }
    }

    #[tracing::instrument(name = "signals", skip_all)]
    pub async fn run(self) -> eyre::Result<()> {
        let signal = shutdown_signals().await?;
        tracing::info!(?signal, "shutting down due to signal");
        self.shutdown.request();
        Ok(())
    }
}

#[derive(Debug)]
enum Signal {
    #[cfg(unix)]
    SIGINT,
    #[cfg(unix)]
    SIGTERM,

    #[cfg(windows)]
    CtrlC,
}

#[cfg(unix)]
async fn shutdown_signals() -> eyre::Result<Signal> {
    use tokio::signal::unix::SignalKind;

    let mut interrupt = tokio::signal::unix::signal(SignalKind::interrupt())?;
    let mut terminate = tokio::signal::unix::signal(SignalKind::terminate())?;
    let signal = tokio::select! {
        _ = interrupt.recv() => Signal::SIGINT,
        _ = terminate.recv() => Signal::SIGTERM,
    };
    Ok(signal)
}

#[cfg(windows)]
async fn shutdown_signals() -> eyre::Result<Signal> {
    tokio::signal::ctrl_c().await?;
    Ok(Signal::CtrlC)
}
