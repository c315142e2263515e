use std::fmt;
use async_trait::async_trait;
use thiserror::Error;
use shared::types::{AppEntry, DeviceIdentity};

/// Failure of a device-facing call. Never retried at this layer.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("{operation} failed: {reason}")]
    Unreachable {
        operation: &'static str,
        reason: String,
    },
}

impl DeviceError {
    pub fn unreachable(operation: &'static str, reason: impl fmt::Display) -> Self {
        Self::Unreachable {
            operation,
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DeviceError>;

/// Key commands understood by the device's control protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    PowerOn,
    PowerOff,
    Rev,
    Fwd,
    Up,
    Down,
    Left,
    Right,
    Select,
    Back,
    Home,
    Play,
    Info,
    FindRemote,
}

impl Key {
    /// Name used on the wire, e.g. `POST /keypress/PowerOff`
    pub fn as_str(&self) -> &'static str {
        match self {
            Key::PowerOn => "PowerOn",
            Key::PowerOff => "PowerOff",
            Key::Rev => "Rev",
            Key::Fwd => "Fwd",
            Key::Up => "Up",
            Key::Down => "Down",
            Key::Left => "Left",
            Key::Right => "Right",
            Key::Select => "Select",
            Key::Back => "Back",
            Key::Home => "Home",
            Key::Play => "Play",
            Key::Info => "Info",
            Key::FindRemote => "FindRemote",
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capabilities the bridge needs from one device's control endpoint.
///
/// Every method is a single network round trip; failures surface as
/// [`DeviceError::Unreachable`] and are never retried here.
#[async_trait]
pub trait DeviceClient: Send + Sync {
    async fn device_info(&self) -> Result<DeviceIdentity>;

    async fn apps(&self) -> Result<Vec<AppEntry>>;

    /// Currently running application. An empty id means none could be determined.
    async fn active_app(&self) -> Result<AppEntry>;

    async fn send_key(&self, key: Key) -> Result<()>;

    async fn launch(&self, id: &str) -> Result<()>;

    /// Make the physical remote beep. Best effort.
    async fn find_remote(&self) -> Result<()>;
}

#[cfg(test)]
pub mod fake {
    use std::sync::{Arc, Mutex};
    use super::*;

    /// Calls observed by [`FakeClient`].
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        DeviceInfo,
        Apps,
        ActiveApp,
        SendKey(Key),
        Launch(String),
        FindRemote,
    }

    #[derive(Default)]
    struct Script {
        identity: Option<DeviceIdentity>,
        apps: Option<Vec<AppEntry>>,
        active_app: Option<AppEntry>,
        commands_fail: bool,
        calls: Vec<Call>,
    }

    /// Scriptable in-memory device. `None` responses fail as unreachable.
    #[derive(Clone, Default)]
    pub struct FakeClient {
        script: Arc<Mutex<Script>>,
    }

    impl FakeClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_identity(self, identity: DeviceIdentity) -> Self {
            self.set_identity(Some(identity));
            self
        }

        pub fn with_apps(self, apps: Vec<AppEntry>) -> Self {
            self.script.lock().unwrap().apps = Some(apps);
            self
        }

        pub fn with_active_app(self, app: AppEntry) -> Self {
            self.set_active_app(Some(app));
            self
        }

        pub fn failing_commands(self) -> Self {
            self.script.lock().unwrap().commands_fail = true;
            self
        }

        pub fn set_identity(&self, identity: Option<DeviceIdentity>) {
            self.script.lock().unwrap().identity = identity;
        }

        pub fn set_active_app(&self, app: Option<AppEntry>) {
            self.script.lock().unwrap().active_app = app;
        }

        pub fn calls(&self) -> Vec<Call> {
            self.script.lock().unwrap().calls.clone()
        }

        /// Commands only, queries filtered out
        pub fn commands(&self) -> Vec<Call> {
            self.calls()
                .into_iter()
                .filter(|c| !matches!(c, Call::DeviceInfo | Call::Apps | Call::ActiveApp))
                .collect()
        }

        fn record<T>(&self, call: Call, f: impl FnOnce(&Script) -> Option<T>) -> Result<T> {
            let mut script = self.script.lock().unwrap();
            script.calls.push(call);
            f(&*script).ok_or_else(|| DeviceError::unreachable("fake", "scripted failure"))
        }

        fn command(&self, call: Call) -> Result<()> {
            self.record(call, |s| (!s.commands_fail).then_some(()))
        }
    }

    #[async_trait]
    impl DeviceClient for FakeClient {
        async fn device_info(&self) -> Result<DeviceIdentity> {
            self.record(Call::DeviceInfo, |s| s.identity.clone())
        }

        async fn apps(&self) -> Result<Vec<AppEntry>> {
            self.record(Call::Apps, |s| s.apps.clone())
        }

        async fn active_app(&self) -> Result<AppEntry> {
            self.record(Call::ActiveApp, |s| s.active_app.clone())
        }

        async fn send_key(&self, key: Key) -> Result<()> {
            self.command(Call::SendKey(key))
        }

        async fn launch(&self, id: &str) -> Result<()> {
            self.command(Call::Launch(id.to_string()))
        }

        async fn find_remote(&self) -> Result<()> {
            self.command(Call::FindRemote)
        }
    }
}
