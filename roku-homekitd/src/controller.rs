//! Per-device state synchronization and command translation.
//!
//! Reads go straight to the device and fall back to a safe value when it
//! cannot be reached. Writes are fire-and-forget: failures are logged and
//! never reported back to the controlling app.

use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use shared::types::DeviceIdentity;
use crate::accessory::{Accessory, Active, RemoteKey, TelevisionHandler};
use crate::device::{DeviceClient, Key};

/// Interval between pushes of live device state into the accessory
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// HomeKit remote keys and the device commands they send.
/// Track skipping has no ECP equivalent and seeks instead; Exit goes home.
const REMOTE_KEYMAP: [(RemoteKey, Key); 13] = [
    (RemoteKey::Rewind, Key::Rev),
    (RemoteKey::FastForward, Key::Fwd),
    (RemoteKey::NextTrack, Key::Fwd),
    (RemoteKey::PreviousTrack, Key::Rev),
    (RemoteKey::ArrowUp, Key::Up),
    (RemoteKey::ArrowDown, Key::Down),
    (RemoteKey::ArrowLeft, Key::Left),
    (RemoteKey::ArrowRight, Key::Right),
    (RemoteKey::Select, Key::Select),
    (RemoteKey::Back, Key::Back),
    (RemoteKey::Exit, Key::Home),
    (RemoteKey::PlayPause, Key::Play),
    (RemoteKey::Information, Key::Info),
];

/// Device command for a raw RemoteKey code, if the code is one we handle
pub fn command_for_remote_key(code: u8) -> Option<Key> {
    REMOTE_KEYMAP
        .iter()
        .find(|(remote, _)| *remote as u8 == code)
        .map(|(_, key)| *key)
}

/// Command that puts the device into the requested power state
pub fn power_command(active: Active) -> Key {
    match active {
        Active::Active => Key::PowerOn,
        Active::Inactive => Key::PowerOff,
    }
}

/// Owns one device's client and its last successfully retrieved identity.
pub struct DeviceController<C> {
    client: C,
    name: String,
    last_known: RwLock<DeviceIdentity>,
}

impl<C: DeviceClient> DeviceController<C> {
    pub fn new(client: C, identity: DeviceIdentity) -> Self {
        Self {
            client,
            name: identity.sanitized().user_device_name,
            last_known: RwLock::new(identity),
        }
    }

    /// Query the device's power state, falling back to the last known one.
    pub async fn active(&self) -> Active {
        let identity = match self.client.device_info().await {
            Ok(identity) => {
                *self.last_known.write().await = identity.clone();
                identity
            }
            Err(e) => {
                tracing::warn!("Unable to get device info for {:?}: {}", self.name, e);
                self.last_known.read().await.clone()
            }
        };

        Active::from_power_mode(&identity.power_mode)
    }

    /// Identifier of the running app, or 0 when it cannot be determined.
    pub async fn active_identifier(&self) -> u32 {
        let app = match self.client.active_app().await {
            Ok(app) => app,
            Err(e) => {
                tracing::warn!("Unable to get active app for {:?}: {}", self.name, e);
                return 0;
            }
        };

        if app.id.is_empty() {
            return 0;
        }

        match app.numeric_id() {
            Some(id) => id,
            None => {
                tracing::debug!("Active app {:?} on {:?} has non-numeric id {:?}", app.name, self.name, app.id);
                0
            }
        }
    }

    async fn press(&self, key: Key) {
        if let Err(e) = self.client.send_key(key).await {
            tracing::warn!("Keypress {} on {:?}: {}", key, self.name, e);
        }
    }

    /// Push live state into the accessory every [`REFRESH_INTERVAL`] until cancelled.
    /// The first push happens one interval after start.
    pub async fn run_refresh(&self, accessory: Arc<Accessory>, cancel: CancellationToken) {
        let start = tokio::time::Instant::now() + REFRESH_INTERVAL;
        let mut interval = tokio::time::interval_at(start, REFRESH_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Refresh for {:?} shutting down", self.name);
                    break;
                }
                _ = interval.tick() => {
                    self.refresh(&accessory).await;
                }
            }
        }
    }

    /// One refresh pass: recompute both observed characteristics and store them.
    pub async fn refresh(&self, accessory: &Accessory) {
        let active = self.active().await;
        let identifier = self.active_identifier().await;

        if accessory.television.active.set_value(active) {
            tracing::info!("{:?} is now {}", self.name, active);
        }
        if accessory.television.active_identifier.set_value(identifier) {
            tracing::debug!("{:?} active identifier is now {}", self.name, identifier);
        }
    }
}

#[async_trait]
impl<C: DeviceClient> TelevisionHandler for DeviceController<C> {
    async fn get_active(&self) -> Active {
        self.active().await
    }

    async fn set_active(&self, active: Active) {
        self.press(power_command(active)).await;
    }

    async fn get_active_identifier(&self) -> u32 {
        self.active_identifier().await
    }

    async fn set_active_identifier(&self, identifier: u32) {
        if let Err(e) = self.client.launch(&identifier.to_string()).await {
            tracing::warn!("Couldn't launch app id {} on {:?}: {}", identifier, self.name, e);
        }
    }

    async fn set_remote_key(&self, code: u8) {
        match command_for_remote_key(code) {
            Some(key) => self.press(key).await,
            None => tracing::debug!("Ignoring unmapped remote key {} for {:?}", code, self.name),
        }
    }

    async fn identify(&self) {
        if let Err(e) = self.client.find_remote().await {
            tracing::warn!("Unable to find remote for {:?}: {}", self.name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use shared::types::AppEntry;
    use crate::accessory;
    use crate::device::fake::{Call, FakeClient};

    fn identity(power_mode: &str) -> DeviceIdentity {
        DeviceIdentity {
            serial_number: "YH00AB123456".to_string(),
            user_device_name: "Bedroom".to_string(),
            power_mode: power_mode.to_string(),
            ..Default::default()
        }
    }

    fn app(id: &str) -> AppEntry {
        AppEntry {
            name: "Netflix".to_string(),
            id: id.to_string(),
        }
    }

    fn controller(client: FakeClient) -> DeviceController<FakeClient> {
        DeviceController::new(client, identity("PowerOn"))
    }

    #[tokio::test]
    async fn test_powered_on_device_running_app() {
        let client = FakeClient::new()
            .with_identity(identity("PowerOn"))
            .with_active_app(app("12"));
        let controller = controller(client);

        assert_eq!(controller.get_active().await, Active::Active);
        assert_eq!(controller.get_active_identifier().await, 12);
    }

    #[rstest]
    #[case("PowerOn", Active::Active)]
    #[case("DisplayOff", Active::Inactive)]
    #[case("Headless", Active::Inactive)]
    #[case("POWERON", Active::Inactive)]
    #[case("PowerOn ", Active::Inactive)]
    #[tokio::test]
    async fn test_power_mode_mapping(#[case] power_mode: &str, #[case] expected: Active) {
        let client = FakeClient::new().with_identity(identity(power_mode));
        assert_eq!(controller(client).get_active().await, expected);
    }

    #[tokio::test]
    async fn test_get_active_falls_back_to_last_known() {
        let client = FakeClient::new().with_identity(identity("DisplayOff"));
        let controller = controller(client.clone());

        assert_eq!(controller.get_active().await, Active::Inactive);

        client.set_identity(None);
        assert_eq!(controller.get_active().await, Active::Inactive);
        assert_eq!(controller.get_active().await, Active::Inactive);
    }

    #[tokio::test]
    async fn test_get_active_falls_back_to_startup_identity() {
        let controller = controller(FakeClient::new());

        assert_eq!(controller.get_active().await, Active::Active);
        assert_eq!(controller.get_active().await, Active::Active);
    }

    #[rstest]
    #[case(None)]
    #[case(Some(app("")))]
    #[case(Some(app("tvinput.dtv")))]
    #[case(Some(app("-3")))]
    #[tokio::test]
    async fn test_active_identifier_defaults_to_zero(#[case] active: Option<AppEntry>) {
        let client = FakeClient::new();
        client.set_active_app(active);

        assert_eq!(controller(client).get_active_identifier().await, 0);
    }

    #[rstest]
    #[case(Active::Active, Key::PowerOn)]
    #[case(Active::Inactive, Key::PowerOff)]
    #[tokio::test]
    async fn test_set_active_sends_power_command(#[case] active: Active, #[case] key: Key) {
        let client = FakeClient::new();
        controller(client.clone()).set_active(active).await;

        assert_eq!(client.commands(), vec![Call::SendKey(key)]);
    }

    #[tokio::test]
    async fn test_failed_writes_are_swallowed() {
        let client = FakeClient::new().failing_commands();
        let controller = controller(client.clone());

        controller.set_active(Active::Inactive).await;
        controller.set_active_identifier(12).await;
        controller.set_remote_key(RemoteKey::Select as u8).await;
        controller.identify().await;

        assert_eq!(
            client.commands(),
            vec![
                Call::SendKey(Key::PowerOff),
                Call::Launch("12".to_string()),
                Call::SendKey(Key::Select),
                Call::FindRemote,
            ]
        );
    }

    #[tokio::test]
    async fn test_set_active_identifier_launches() {
        let client = FakeClient::new();
        controller(client.clone()).set_active_identifier(837).await;

        assert_eq!(client.commands(), vec![Call::Launch("837".to_string())]);
    }

    #[rstest]
    #[case(RemoteKey::Rewind, Key::Rev)]
    #[case(RemoteKey::FastForward, Key::Fwd)]
    #[case(RemoteKey::NextTrack, Key::Fwd)]
    #[case(RemoteKey::PreviousTrack, Key::Rev)]
    #[case(RemoteKey::ArrowUp, Key::Up)]
    #[case(RemoteKey::ArrowDown, Key::Down)]
    #[case(RemoteKey::ArrowLeft, Key::Left)]
    #[case(RemoteKey::ArrowRight, Key::Right)]
    #[case(RemoteKey::Select, Key::Select)]
    #[case(RemoteKey::Back, Key::Back)]
    #[case(RemoteKey::Exit, Key::Home)]
    #[case(RemoteKey::PlayPause, Key::Play)]
    #[case(RemoteKey::Information, Key::Info)]
    #[tokio::test]
    async fn test_remote_key_mapping(#[case] remote: RemoteKey, #[case] key: Key) {
        let client = FakeClient::new();
        controller(client.clone()).set_remote_key(remote as u8).await;

        assert_eq!(client.commands(), vec![Call::SendKey(key)]);
    }

    #[tokio::test]
    async fn test_unmapped_remote_keys_make_no_calls() {
        let client = FakeClient::new();
        let controller = controller(client.clone());

        for code in [12u8, 13, 14, 16, 100, 255] {
            controller.set_remote_key(code).await;
        }

        assert!(client.calls().is_empty());
    }

    #[test]
    fn test_keymap_covers_thirteen_codes() {
        let mapped = (0..=u8::MAX).filter(|c| command_for_remote_key(*c).is_some()).count();
        assert_eq!(mapped, 13);
    }

    #[tokio::test]
    async fn test_refresh_pushes_live_state() {
        let client = FakeClient::new()
            .with_identity(identity("DisplayOff"))
            .with_active_app(app("12"));
        let controller = Arc::new(controller(client.clone()));
        let accessory = accessory::build(&identity("PowerOn"), &[app("12")], controller.clone());

        let mut active = accessory.television.active.subscribe();
        let mut identifier = accessory.television.active_identifier.subscribe();

        controller.refresh(&accessory).await;

        assert_eq!(accessory.television.active.value(), Active::Inactive);
        assert_eq!(accessory.television.active_identifier.value(), 12);

        // Subscribers are woken with the new values
        assert!(active.has_changed().unwrap());
        assert_eq!(*active.borrow_and_update(), Active::Inactive);
        assert!(identifier.has_changed().unwrap());
        assert_eq!(*identifier.borrow_and_update(), 12);

        // Nothing new on an unchanged pass
        controller.refresh(&accessory).await;
        assert!(!active.has_changed().unwrap());
        assert!(!identifier.has_changed().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_loop_ticks_and_stops_on_cancel() {
        let client = FakeClient::new()
            .with_identity(identity("PowerOn"))
            .with_active_app(app("12"));
        let controller = Arc::new(controller(client.clone()));
        let accessory = Arc::new(accessory::build(&identity("PowerOn"), &[], controller.clone()));
        let cancel = CancellationToken::new();

        let task = tokio::spawn({
            let controller = controller.clone();
            let accessory = accessory.clone();
            let cancel = cancel.clone();
            async move { controller.run_refresh(accessory, cancel).await }
        });

        tokio::time::sleep(REFRESH_INTERVAL / 2).await;
        assert!(client.calls().is_empty(), "first refresh waits one interval");

        tokio::time::sleep(REFRESH_INTERVAL).await;
        assert_eq!(client.calls(), vec![Call::DeviceInfo, Call::ActiveApp]);
        assert_eq!(accessory.television.active_identifier.value(), 12);

        cancel.cancel();
        task.await.unwrap();

        tokio::time::sleep(REFRESH_INTERVAL * 3).await;
        assert_eq!(client.calls().len(), 2);
    }
}
