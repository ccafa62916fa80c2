use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::clipboard::{ClipboardProvider, SystemClipboard};
use crate::config::Config;
use crate::discovery::{ensure_paired, DeviceDiscovery, StaticDevices};
use crate::progress::TransferProgress;
use crate::settings::AppSettings;
use crate::sync::SyncLoop;
use crate::transport::{
    ConnectionManager, ConnectionStatus, ProgressUpdate, Role, SessionEvent, TcpTransport,
};

#[derive(Parser)]
#[command(name = "bluesync")]
#[command(about = "Point-to-point clipboard synchronization between two devices")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Wait for a device to connect and sync with it")]
    Listen,

    #[command(about = "Connect to a device and sync with it")]
    Connect {
        /// Device address; defaults to the last connected device
        address: Option<String>,
    },

    #[command(about = "List known devices")]
    Devices,

    #[command(about = "Configuration management")]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    #[command(about = "Show current configuration")]
    Show,

    #[command(about = "Generate example configuration")]
    Init {
        #[arg(long)]
        force: bool,
    },

    #[command(about = "Validate configuration")]
    Validate,
}

pub struct CliHandler {
    config: Arc<Config>,
    config_path: Option<PathBuf>,
}

impl CliHandler {
    pub fn new(config_path: Option<PathBuf>) -> Result<Self> {
        let config = Arc::new(Config::load_config(config_path.as_deref())?);
        Ok(Self {
            config,
            config_path,
        })
    }

    pub async fn handle_command(&mut self, command: Commands) -> Result<()> {
        match command {
            Commands::Listen => self.listen().await,
            Commands::Connect { address } => self.connect(address).await,
            Commands::Devices => self.show_devices().await,
            Commands::Config { action } => Ok(self.handle_config_action(action)?),
        }
    }

    async fn listen(&self) -> Result<()> {
        let clipboard = open_clipboard()?;
        let transport = Arc::new(TcpTransport::new(
            self.config.transport.bind_addr.clone(),
            self.config.transport_config().connect_timeout,
        ));
        let manager = ConnectionManager::new(Role::Listener, transport, self.config.transport_config());

        let shutdown = CancellationToken::new();
        let tasks = self.spawn_session_tasks(&manager, clipboard, &shutdown);

        println!(
            "📡 {} waiting for a device on {}. Press Ctrl-C to stop.",
            self.config.device_name, self.config.transport.bind_addr
        );
        let result = tokio::select! {
            result = manager.start_listening() => result.map_err(anyhow::Error::from),
            _ = tokio::signal::ctrl_c() => {
                println!();
                Ok(())
            }
        };

        manager.disconnect().await;
        shutdown.cancel();
        join_all(tasks).await;
        result
    }

    async fn connect(&self, address: Option<String>) -> Result<()> {
        let settings_path = &self.config.settings.path;
        let mut settings = AppSettings::load(settings_path);

        let address = match address {
            Some(address) => address,
            None => {
                let (address, name) = settings.last_device().ok_or_else(|| {
                    anyhow!("No address given and no previously connected device")
                })?;
                println!("🔄 Reconnecting to {} ({})", name, address);
                address.to_string()
            }
        };

        let devices = StaticDevices::new(&self.config.discovery.devices);
        if devices.get(&address).await.is_some() {
            ensure_paired(&devices, &address)
                .await
                .with_context(|| format!("Could not pair with {}", address))?;
        } else {
            debug!("{} is not a configured device, skipping pairing", address);
        }

        let clipboard = open_clipboard()?;
        let transport = Arc::new(TcpTransport::new(
            self.config.transport.bind_addr.clone(),
            self.config.transport_config().connect_timeout,
        ));
        let manager =
            ConnectionManager::new(Role::Initiator, transport, self.config.transport_config());

        let shutdown = CancellationToken::new();
        let tasks = self.spawn_session_tasks(&manager, clipboard, &shutdown);
        let mut watch = manager.subscribe();

        let peer_name = match manager.connect(&address).await {
            Ok(peer_name) => peer_name,
            Err(e) => {
                shutdown.cancel();
                join_all(tasks).await;
                return Err(e).with_context(|| format!("Could not connect to {}", address));
            }
        };

        settings.remember(&address, &peer_name);
        settings.save(settings_path);
        println!("Press Ctrl-C to stop.");

        tokio::select! {
            _ = wait_for_disconnect(&mut watch) => {}
            _ = tokio::signal::ctrl_c() => println!(),
        }

        manager.disconnect().await;
        shutdown.cancel();
        join_all(tasks).await;
        Ok(())
    }

    /// Start the sync loop and the status printer. Both subscribe before
    /// the manager starts so no status is missed.
    fn spawn_session_tasks(
        &self,
        manager: &ConnectionManager,
        clipboard: Arc<dyn ClipboardProvider>,
        shutdown: &CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        let sync = Arc::new(SyncLoop::new(
            clipboard,
            Arc::new(manager.clone()),
            self.config.poll_interval(),
        ));
        sync.set_enabled(self.config.sync.enabled);
        if !self.config.sync.enabled {
            info!("Sending local changes is disabled");
        }

        let sync_task = {
            let events = manager.subscribe();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { sync.run(events, shutdown).await })
        };

        let printer_task = {
            let events = manager.subscribe();
            let progress = manager.subscribe_progress();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { print_events(events, progress, shutdown).await })
        };

        vec![sync_task, printer_task]
    }

    async fn show_devices(&self) -> Result<()> {
        let devices = StaticDevices::new(&self.config.discovery.devices);
        let found = devices.discover(self.config.scan_timeout()).await?;

        if found.is_empty() {
            println!("No devices configured. Add [[discovery.devices]] entries to the config file.");
        } else {
            println!("Devices ({}):", found.len());
            for device in found {
                println!(
                    "  {} - {}{}",
                    device.name,
                    device.address,
                    if device.paired { " (paired)" } else { "" }
                );
            }
        }

        if let Some((address, name)) = AppSettings::load(&self.config.settings.path).last_device() {
            println!("Last connected: {} ({})", name, address);
        }
        Ok(())
    }

    fn handle_config_action(&self, action: ConfigAction) -> crate::Result<()> {
        match action {
            ConfigAction::Show => {
                println!("Current Configuration:");
                println!("{}", self.config.to_toml()?);
            }
            ConfigAction::Init { force } => {
                let path = self
                    .config_path
                    .clone()
                    .or_else(Config::default_path)
                    .ok_or_else(|| {
                        crate::Error::Other("Could not find config directory".to_string())
                    })?;
                Config::write_example(&path, force)?;
                println!("Example configuration written to {}", path.display());
            }
            ConfigAction::Validate => {
                if let Some(path) = &self.config_path {
                    Config::validate(path)?;
                }
                // Config is already loaded and validated in CliHandler::new()
                println!("Configuration is valid");
            }
        }
        Ok(())
    }
}

fn open_clipboard() -> crate::Result<Arc<dyn ClipboardProvider>> {
    let clipboard = SystemClipboard::new()?;
    Ok(Arc::new(clipboard))
}

async fn join_all(tasks: Vec<JoinHandle<()>>) {
    for task in tasks {
        if let Err(e) = task.await {
            debug!("Background task ended abnormally: {}", e);
        }
    }
}

async fn wait_for_disconnect(events: &mut broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::Status(ConnectionStatus::Disconnected))
            | Err(broadcast::error::RecvError::Closed) => return,
            _ => {}
        }
    }
}

async fn print_events(
    mut events: broadcast::Receiver<SessionEvent>,
    mut progress: broadcast::Receiver<ProgressUpdate>,
    shutdown: CancellationToken,
) {
    let mut transfer: Option<TransferProgress> = None;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            event = events.recv() => match event {
                Ok(SessionEvent::Status(status)) => {
                    let icon = match status {
                        ConnectionStatus::Connected { .. } => "🟢",
                        ConnectionStatus::Disconnected => "🔴",
                        ConnectionStatus::Connecting | ConnectionStatus::Listening => "🟡",
                    };
                    println!("{} Status: {}", icon, status);
                }
                Ok(SessionEvent::DataReceived(content)) => {
                    println!("📋 Received {}", content.describe());
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return,
            },
            update = progress.recv() => match update {
                Ok(update) => {
                    if !transfer.as_ref().is_some_and(|t| t.tracks(&update)) {
                        transfer = Some(TransferProgress::new(update.direction, update.total_bytes));
                    }
                    if let Some(tracker) = transfer.as_mut() {
                        if tracker.update(&update) {
                            transfer = None;
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return,
            },
        }
    }
}
