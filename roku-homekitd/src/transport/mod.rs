//! Publishing of accessories to HomeKit controllers.
//!
//! Each device gets its own transport: a pairing store under its storage
//! directory, a HAP server on its own port, and an mDNS advertisement.
//! Controllers pair with the setup code, verify each connection with their
//! long-term keys, and only then reach the accessory database.

pub mod advertise;
pub mod connection;
pub mod hap;
pub mod hash;
pub mod pairing;
pub mod routes;
pub mod session;
pub mod srp;
pub mod store;
pub mod tlv;
pub mod wire;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use async_trait::async_trait;
use mdns_sd::ServiceDaemon;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use crate::accessory::Accessory;
use self::advertise::{Advertisement, Advertiser};
use self::pairing::PairingContext;
use self::routes::AppState;
use self::store::PairingStore;

/// Name of the pairing database inside a device's storage directory
const STORE_FILE: &str = "pairing.db";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("pairing storage: {0:#}")]
    Storage(anyhow::Error),
    #[error("failed to bind listener: {0}")]
    Bind(#[source] std::io::Error),
    #[error("advertisement: {0:#}")]
    Advertise(anyhow::Error),
}

/// Lock a mutex, carrying on with the data if a previous holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-device publishing settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// 8-digit setup code
    pub pin: String,
    /// Directory owned by this device's transport
    pub storage_path: PathBuf,
}

/// Creates transports for built accessories.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(
        &self,
        accessory: Arc<Accessory>,
        config: TransportConfig,
    ) -> Result<Box<dyn Transport>, TransportError>;
}

#[async_trait]
pub trait Transport: Send {
    /// Begin serving and advertising in the background.
    fn start(&mut self) -> Result<(), TransportError>;

    /// Stop serving, withdraw the advertisement and flush pairing state.
    /// Resolves once shutdown is complete.
    async fn stop(self: Box<Self>);
}

/// "00102003" -> "001-02-003", the form printed on accessory labels
pub fn setup_code(pin: &str) -> String {
    if pin.len() == 8 && pin.is_ascii() {
        format!("{}-{}-{}", &pin[..3], &pin[3..5], &pin[5..])
    } else {
        pin.to_string()
    }
}

/// Publishes accessories over IP, sharing one mDNS responder.
pub struct IpPublisher {
    daemon: ServiceDaemon,
}

impl IpPublisher {
    pub fn new(daemon: ServiceDaemon) -> Self {
        Self { daemon }
    }
}

#[async_trait]
impl Publisher for IpPublisher {
    async fn publish(
        &self,
        accessory: Arc<Accessory>,
        config: TransportConfig,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let name = accessory.info.name.clone();

        // Load or initialize pairing state
        let store = PairingStore::open(config.storage_path.join(STORE_FILE))
            .map_err(TransportError::Storage)?;
        let config_number = store
            .sync_config_number(&hash::compute_hash(&accessory))
            .map_err(TransportError::Storage)?;
        let device_id = store
            .device_id(&accessory.info.serial_number)
            .map_err(TransportError::Storage)?;
        let store = Arc::new(Mutex::new(store));

        let code = setup_code(&config.pin);
        let pairing = PairingContext::new(store.clone(), device_id.clone(), code.clone())
            .map_err(TransportError::Storage)?;
        let paired = pairing.is_paired();

        let listener = TcpListener::bind("0.0.0.0:0")
            .await
            .map_err(TransportError::Bind)?;
        let port = listener.local_addr().map_err(TransportError::Bind)?.port();

        let advertisement = Advertisement {
            device_id,
            config_number,
            model: accessory.info.model.clone(),
            paired,
        };
        // Fail early on a name or host the responder would reject
        advertise::service_info(&name, port, &advertisement).map_err(TransportError::Advertise)?;
        let advertiser = Advertiser::new(self.daemon.clone(), &name, port, advertisement);

        tracing::info!(
            "Accessory {:?} ready on port {} (c#={}, paired={}), setup code {}",
            name,
            port,
            config_number,
            paired,
            code
        );

        Ok(Box::new(IpTransport {
            name,
            accessory,
            store,
            pairing: Arc::new(pairing),
            advertiser: Arc::new(advertiser),
            listener: Some(listener),
            tasks: Vec::new(),
            cancel: CancellationToken::new(),
        }))
    }
}

pub struct IpTransport {
    name: String,
    accessory: Arc<Accessory>,
    store: Arc<Mutex<PairingStore>>,
    pairing: Arc<PairingContext>,
    advertiser: Arc<Advertiser>,
    listener: Option<TcpListener>,
    tasks: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

/// Re-announce the status flag whenever pairings come and go
async fn track_pairing(pairing: Arc<PairingContext>, advertiser: Arc<Advertiser>, cancel: CancellationToken) {
    let mut paired = pairing.subscribe_paired();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = paired.changed() => {
                if changed.is_err() {
                    break;
                }
                let now = *paired.borrow_and_update();
                if let Err(e) = advertiser.set_paired(now) {
                    tracing::error!("Failed to update advertisement: {:#}", e);
                }
            }
        }
    }
}

#[async_trait]
impl Transport for IpTransport {
    fn start(&mut self) -> Result<(), TransportError> {
        let Some(listener) = self.listener.take() else {
            return Ok(());
        };

        let app = routes::router(AppState {
            accessory: self.accessory.clone(),
            pairing: self.pairing.clone(),
        });
        self.tasks.push(tokio::spawn(connection::accept(
            listener,
            app,
            self.accessory.clone(),
            self.cancel.clone(),
        )));
        self.tasks.push(tokio::spawn(track_pairing(
            self.pairing.clone(),
            self.advertiser.clone(),
            self.cancel.clone(),
        )));

        self.advertiser.register().map_err(TransportError::Advertise)
    }

    async fn stop(self: Box<Self>) {
        let IpTransport {
            name,
            store,
            advertiser,
            tasks,
            cancel,
            ..
        } = *self;

        // Stop accepting and close controller connections
        cancel.cancel();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!("Transport task for {:?} failed: {}", name, e);
            }
        }

        if let Err(e) = advertiser.unregister() {
            tracing::error!("Failed to unregister {:?}: {:#}", name, e);
        }

        if let Err(e) = lock(&store).record_stop() {
            tracing::error!("Failed to flush pairing store for {:?}: {:#}", name, e);
        }

        tracing::info!("Transport for {:?} stopped", name);
    }
}
