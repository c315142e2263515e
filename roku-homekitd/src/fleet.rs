//! Setup, start and shutdown of every discovered device.
//!
//! Devices are independent: one failing to set up or start never affects the
//! others, and no state is shared between them.

use std::sync::Arc;
use futures::future::join_all;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use crate::accessory::{self, Accessory};
use crate::config::Config;
use crate::controller::DeviceController;
use crate::device::{DeviceClient, DeviceError};
use crate::transport::{Publisher, Transport, TransportConfig, TransportError};

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("unable to get device info: {0}")]
    DeviceInfo(#[source] DeviceError),
    #[error("unable to publish {name:?}: {source}")]
    Transport {
        name: String,
        #[source]
        source: TransportError,
    },
}

/// One fully set up device
pub struct Member<C> {
    controller: Arc<DeviceController<C>>,
    accessory: Arc<Accessory>,
    transport: Box<dyn Transport>,
    refresh: Option<JoinHandle<()>>,
}

impl<C> Member<C> {
    pub fn accessory(&self) -> &Arc<Accessory> {
        &self.accessory
    }
}

/// Query the device, build its accessory and hand it to the publisher.
/// A failed app listing leaves the accessory without input sources.
pub async fn setup_device<C>(
    client: C,
    publisher: &dyn Publisher,
    config: &Config,
) -> Result<Member<C>, SetupError>
where
    C: DeviceClient + 'static,
{
    let identity = client.device_info().await.map_err(SetupError::DeviceInfo)?;
    let name = identity.sanitized().user_device_name;

    let apps = match client.apps().await {
        Ok(apps) => apps,
        Err(e) => {
            tracing::warn!("Error getting apps for {:?}: {}", name, e);
            Vec::new()
        }
    };

    let storage_path = config.device_storage(&identity.serial_number);
    let controller = Arc::new(DeviceController::new(client, identity.clone()));
    let accessory = Arc::new(accessory::build(&identity, &apps, controller.clone()));

    let transport = publisher
        .publish(
            accessory.clone(),
            TransportConfig {
                pin: config.homekit_pin.clone(),
                storage_path,
            },
        )
        .await
        .map_err(|source| SetupError::Transport {
            name: name.clone(),
            source,
        })?;

    tracing::info!("Set up {:?} with {} apps", name, apps.len());

    Ok(Member {
        controller,
        accessory,
        transport,
        refresh: None,
    })
}

pub struct Fleet<C> {
    members: Vec<Member<C>>,
    cancel: CancellationToken,
}

impl<C> Fleet<C>
where
    C: DeviceClient + 'static,
{
    /// Set up every device concurrently, skipping the ones that fail
    pub async fn assemble(clients: Vec<C>, publisher: &dyn Publisher, config: &Config) -> Self {
        let results = join_all(
            clients
                .into_iter()
                .map(|client| setup_device(client, publisher, config)),
        )
        .await;

        let members = results
            .into_iter()
            .filter_map(|result| match result {
                Ok(member) => Some(member),
                Err(e) => {
                    tracing::error!("Skipping device: {}", e);
                    None
                }
            })
            .collect();

        Self {
            members,
            cancel: CancellationToken::new(),
        }
    }

    pub fn members(&self) -> &[Member<C>] {
        &self.members
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Start every transport and refresh loop. Refresh loops end when `cancel`
    /// fires or the fleet shuts down. Devices whose transport fails to start
    /// are stopped and dropped.
    pub async fn start(&mut self, cancel: &CancellationToken) {
        self.cancel = cancel.child_token();

        let mut failed = Vec::new();
        for (i, member) in self.members.iter_mut().enumerate() {
            let name = member.accessory.info.name.clone();
            tracing::info!("Starting transport for {:?}", name);

            if let Err(e) = member.transport.start() {
                tracing::error!("Unable to start transport for {:?}: {}", name, e);
                failed.push(i);
                continue;
            }

            let controller = member.controller.clone();
            let accessory = member.accessory.clone();
            let cancel = self.cancel.clone();
            member.refresh = Some(tokio::spawn(async move {
                controller.run_refresh(accessory, cancel).await;
            }));
        }

        for i in failed.into_iter().rev() {
            let member = self.members.remove(i);
            member.transport.stop().await;
        }
    }

    /// Stop refresh loops, then every transport. Returns once all are down.
    pub async fn shutdown(self) {
        self.cancel.cancel();

        let mut transports = Vec::with_capacity(self.members.len());
        for member in self.members {
            if let Some(refresh) = member.refresh {
                if let Err(e) = refresh.await {
                    tracing::error!("Refresh task for {:?} failed: {}", member.accessory.info.name, e);
                }
            }
            transports.push(member.transport);
        }

        join_all(transports.into_iter().map(|transport| transport.stop())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use async_trait::async_trait;
    use shared::types::{AppEntry, DeviceIdentity};
    use crate::config::Cli;
    use crate::device::fake::{Call, FakeClient};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Published(String, PathBuf),
        Started(String),
        Stopped(String),
    }

    type Log = Arc<Mutex<Vec<Event>>>;

    /// Records lifecycle events. Refuses serials in `refuse`; fails `start` for `broken`.
    #[derive(Default)]
    struct RecordingPublisher {
        log: Log,
        refuse: Vec<String>,
        broken: Vec<String>,
    }

    struct RecordingTransport {
        serial: String,
        log: Log,
        broken: bool,
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        async fn publish(
            &self,
            accessory: Arc<Accessory>,
            config: TransportConfig,
        ) -> Result<Box<dyn Transport>, TransportError> {
            let serial = accessory.info.serial_number.clone();
            if self.refuse.contains(&serial) {
                return Err(TransportError::Storage(anyhow::anyhow!("read-only")));
            }

            self.log
                .lock()
                .unwrap()
                .push(Event::Published(serial.clone(), config.storage_path));
            Ok(Box::new(RecordingTransport {
                broken: self.broken.contains(&serial),
                serial,
                log: self.log.clone(),
            }))
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        fn start(&mut self) -> Result<(), TransportError> {
            if self.broken {
                return Err(TransportError::Advertise(anyhow::anyhow!("no interface")));
            }
            self.log.lock().unwrap().push(Event::Started(self.serial.clone()));
            Ok(())
        }

        async fn stop(self: Box<Self>) {
            self.log.lock().unwrap().push(Event::Stopped(self.serial.clone()));
        }
    }

    fn config() -> Config {
        Config::resolve(Cli {
            storage_path: Some(PathBuf::from("/data/roku")),
            ..Default::default()
        })
        .unwrap()
    }

    fn device(serial: &str) -> FakeClient {
        FakeClient::new()
            .with_identity(DeviceIdentity {
                serial_number: serial.to_string(),
                user_device_name: format!("TV {}", serial),
                power_mode: "PowerOn".to_string(),
                ..Default::default()
            })
            .with_apps(vec![AppEntry {
                name: "Netflix".to_string(),
                id: "12".to_string(),
            }])
    }

    fn events(log: &Log) -> Vec<Event> {
        log.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_one_failing_device_does_not_stop_the_others() {
        let publisher = RecordingPublisher::default();
        let clients = vec![device("A1"), FakeClient::new(), device("C3")];

        let mut fleet = Fleet::assemble(clients, &publisher, &config()).await;
        assert_eq!(fleet.members().len(), 2);

        let cancel = CancellationToken::new();
        fleet.start(&cancel).await;

        let log = events(&publisher.log);
        assert!(log.contains(&Event::Published("A1".to_string(), PathBuf::from("/data/roku/A1"))));
        assert!(log.contains(&Event::Published("C3".to_string(), PathBuf::from("/data/roku/C3"))));
        assert!(log.contains(&Event::Started("A1".to_string())));
        assert!(log.contains(&Event::Started("C3".to_string())));

        cancel.cancel();
        fleet.shutdown().await;

        let log = events(&publisher.log);
        assert!(log.contains(&Event::Stopped("A1".to_string())));
        assert!(log.contains(&Event::Stopped("C3".to_string())));
    }

    #[tokio::test]
    async fn test_app_listing_failure_gives_zero_inputs() {
        let publisher = RecordingPublisher::default();
        let client = FakeClient::new().with_identity(DeviceIdentity {
            serial_number: "B2".to_string(),
            ..Default::default()
        });

        let member = setup_device(client.clone(), &publisher, &config()).await.unwrap();

        assert!(member.accessory().inputs.is_empty());
        assert_eq!(client.calls(), vec![Call::DeviceInfo, Call::Apps]);
    }

    #[tokio::test]
    async fn test_transport_failure_skips_device() {
        let publisher = RecordingPublisher {
            refuse: vec!["A1".to_string()],
            ..Default::default()
        };

        let err = setup_device(device("A1"), &publisher, &config()).await.err().unwrap();
        assert!(matches!(err, SetupError::Transport { .. }));

        let fleet = Fleet::assemble(vec![device("A1"), device("B2")], &publisher, &config()).await;
        assert_eq!(fleet.members().len(), 1);
        assert_eq!(fleet.members()[0].accessory().info.serial_number, "B2");
    }

    #[tokio::test]
    async fn test_transport_that_fails_to_start_is_dropped() {
        let publisher = RecordingPublisher {
            broken: vec!["A1".to_string()],
            ..Default::default()
        };

        let mut fleet = Fleet::assemble(vec![device("A1"), device("B2")], &publisher, &config()).await;
        fleet.start(&CancellationToken::new()).await;

        assert_eq!(fleet.members().len(), 1);
        assert!(events(&publisher.log).contains(&Event::Stopped("A1".to_string())));

        fleet.shutdown().await;
        assert!(events(&publisher.log).contains(&Event::Stopped("B2".to_string())));
    }

    #[tokio::test]
    async fn test_empty_fleet() {
        let publisher = RecordingPublisher::default();
        let mut fleet = Fleet::<FakeClient>::assemble(Vec::new(), &publisher, &config()).await;

        fleet.start(&CancellationToken::new()).await;
        assert!(fleet.is_empty());
        fleet.shutdown().await;
        assert!(events(&publisher.log).is_empty());
    }
}
