use altair_link::comms::{
    CommsEvent, CommsManager, ConsoleOutput, FileIdentityStore, MqttEngine, ResolveProbe,
    TopicKind,
};
use altair_link::config::{AppConfig, PanelConfig};
use altair_link::panel::{
    CommandDispatcher, FrontPanelLink, GpioSpiBus, PanelError, PanelReading, PanelStatus,
};
use color_eyre::{eyre::eyre, Result};
use std::process::ExitCode;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    setup()?;

    let config = setup_config().await?;
    let cancel = CancellationToken::new();

    // Remote channel
    let settings = config.broker.comms_settings()?;
    let probe = ResolveProbe::new(settings.host.clone(), settings.port);
    let identity = FileIdentityStore::new(config.identity.path.clone());
    info!("Channel id is read from {}", identity.path().display());

    let (event_tx, event_rx) = mpsc::channel(100);
    let (manager, comms) =
        CommsManager::new(MqttEngine::new(), identity, probe, settings, event_tx);
    let comms_task = manager.spawn(cancel.clone());

    let console = comms.console(config.output.capacity);
    let flush_every = Duration::from_millis(config.output.flush_interval_ms.max(1));
    let events_task = tokio::spawn(handle_events(
        event_rx,
        console,
        flush_every,
        cancel.clone(),
    ));

    // Front panel
    let panel_task = if config.panel.enabled {
        let panel = config.panel.clone();
        let cancel = cancel.clone();
        Some(tokio::task::spawn_blocking(move || run_panel(panel, cancel)))
    } else {
        info!("Front panel disabled in config");
        None
    };

    let fatal = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(|e| eyre!("Failed to listen for ctrl-c: {}", e))?;
            info!("Shutdown requested");
            None
        }
        failure = panel_failure(panel_task) => failure?,
    };

    cancel.cancel();
    if let Err(e) = comms_task.await {
        warn!("Connectivity worker ended abnormally: {}", e);
    }
    if let Err(e) = events_task.await {
        warn!("Event handler ended abnormally: {}", e);
    }
    debug!("Final channel status: {:?}", comms.stats());

    match fatal {
        Some(e) => {
            error!("Front panel failure: {}", e);
            Ok(ExitCode::from(e.exit_code().unwrap_or(1)))
        }
        None => Ok(ExitCode::SUCCESS),
    }
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    let level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|level| level.parse::<Level>().ok())
        .unwrap_or(Level::INFO);

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}

async fn setup_config() -> Result<AppConfig> {
    let path = AppConfig::default_path();
    AppConfig::ensure_default(&path).await?;

    let config = AppConfig::load(&path).await?;
    info!("Using config {}", path.display());
    Ok(config)
}

/// Resolves only when the panel loop stops with a fatal error.
///
/// A panel that cannot be brought up is reported and the process carries on
/// with the remote channel alone.
async fn panel_failure(
    task: Option<JoinHandle<Result<(), PanelError>>>,
) -> Result<Option<PanelError>> {
    if let Some(task) = task {
        match task.await {
            Ok(Err(e)) if e.is_fatal() => return Ok(Some(e)),
            Ok(Err(e)) => warn!("Front panel unavailable: {}", e),
            Ok(Ok(())) => debug!("Panel loop stopped"),
            Err(e) => return Err(eyre!("Panel loop failed: {}", e)),
        }
    }
    std::future::pending().await
}

/// Blocking polling loop: switches in, LEDs out
fn run_panel(config: PanelConfig, cancel: CancellationToken) -> Result<(), PanelError> {
    let bus = GpioSpiBus::new(config.pins.clone())?;
    let mut link = FrontPanelLink::create(Box::new(bus), config.spi.clone()).initialize()?;
    let mut dispatcher = CommandDispatcher::new();
    let interval = Duration::from_millis(config.poll_interval_ms);

    let mut on_command = |reading: PanelReading| {
        info!(
            "Panel command {:#04x} at address {:#06x}",
            reading.cmd, reading.address
        );
    };

    info!("Front panel polling every {:?}", interval);
    while !cancel.is_cancelled() {
        dispatcher.poll(&mut link, &mut on_command)?;

        // mirror the switches on the LEDs
        let address = dispatcher.bus_switches();
        let status = PanelStatus::new(
            dispatcher.last_command(),
            (address & 0xff) as u8,
            address,
        );
        if let Err(e) = link.write_status(status) {
            debug!("LED frame dropped: {}", e);
        }

        std::thread::sleep(interval);
    }

    info!("Front panel loop stopped");
    Ok(())
}

async fn handle_events(
    mut events: mpsc::Receiver<CommsEvent>,
    mut console: ConsoleOutput,
    flush_every: Duration,
    cancel: CancellationToken,
) {
    let mut flush = tokio::time::interval(flush_every);
    flush.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = flush.tick() => console.flush_pending(),
            event = events.recv() => match event {
                Some(event) => on_event(event, &mut console),
                None => break,
            },
        }
    }
    console.flush_pending();
}

fn on_event(event: CommsEvent, console: &mut ConsoleOutput) {
    match event {
        CommsEvent::StateChanged(state) => info!("Remote channel {}", state),
        CommsEvent::Connected { channel_id } => {
            info!("Remote channel ready on channel {}", channel_id)
        }
        CommsEvent::Message(message) => match message.kind {
            // terminal loopback until a CPU consumes the input
            TopicKind::Data | TopicKind::Paste => {
                for byte in &message.payload {
                    console.append_character(*byte);
                }
            }
            TopicKind::Control => info!("Control message: {}", message),
            TopicKind::Vdisk => info!(
                "Disk response on {} ({} bytes)",
                message.topic,
                message.payload.len()
            ),
            TopicKind::Unknown => warn!("Unhandled message: {}", message),
        },
    }
}
