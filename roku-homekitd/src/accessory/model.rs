use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use super::TelevisionHandler;

/// Instance ids, assigned once when the accessory is built.
pub mod iid {
    pub const INFO_SERVICE: u64 = 1;
    pub const IDENTIFY: u64 = 2;
    pub const MANUFACTURER: u64 = 3;
    pub const MODEL: u64 = 4;
    pub const NAME: u64 = 5;
    pub const SERIAL_NUMBER: u64 = 6;
    pub const FIRMWARE_REVISION: u64 = 7;

    pub const TELEVISION_SERVICE: u64 = 8;
    pub const ACTIVE: u64 = 9;
    pub const ACTIVE_IDENTIFIER: u64 = 10;
    pub const CONFIGURED_NAME: u64 = 11;
    pub const SLEEP_DISCOVERY_MODE: u64 = 12;
    pub const REMOTE_KEY: u64 = 13;

    /// Input sources occupy consecutive blocks starting here:
    /// service, name, configured name, source type, is-configured, identifier
    pub const FIRST_INPUT: u64 = 14;
    pub const INPUT_BLOCK: u64 = 6;
}

/// Accessory id of the single accessory served per device
pub const AID: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Active {
    Inactive = 0,
    Active = 1,
}

impl Active {
    /// Only an exact "PowerOn" counts as on; standby modes such as "DisplayOff" do not.
    pub fn from_power_mode(power_mode: &str) -> Self {
        if power_mode == "PowerOn" {
            Active::Active
        } else {
            Active::Inactive
        }
    }

    pub fn from_value(value: u8) -> Option<Self> {
        match value {
            0 => Some(Active::Inactive),
            1 => Some(Active::Active),
            _ => None,
        }
    }
}

impl fmt::Display for Active {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Active::Inactive => f.write_str("inactive"),
            Active::Active => f.write_str("active"),
        }
    }
}

/// HomeKit RemoteKey characteristic values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RemoteKey {
    Rewind = 0,
    FastForward = 1,
    NextTrack = 2,
    PreviousTrack = 3,
    ArrowUp = 4,
    ArrowDown = 5,
    ArrowLeft = 6,
    ArrowRight = 7,
    Select = 8,
    Back = 9,
    Exit = 10,
    PlayPause = 11,
    Information = 15,
}

pub const SLEEP_DISCOVERY_ALWAYS_DISCOVERABLE: u8 = 1;
pub const INPUT_SOURCE_TYPE_APPLICATION: u8 = 10;
pub const IS_CONFIGURED: u8 = 1;

/// A characteristic whose value changes while the accessory is published.
///
/// Updates only count as changes when the value actually differs.
#[derive(Debug)]
pub struct Characteristic<T> {
    tx: watch::Sender<T>,
}

impl<T: Clone + PartialEq> Characteristic<T> {
    pub fn new(initial: T) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn value(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Receiver that is notified of every change made through [`set_value`](Self::set_value)
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }

    /// Store a new value. Returns true if it differed from the old one.
    pub fn set_value(&self, value: T) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        })
    }
}

/// Accessory information service contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessoryInfo {
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    pub firmware_revision: String,
    pub serial_number: String,
}

#[derive(Debug)]
pub struct TelevisionService {
    pub configured_name: String,
    pub sleep_discovery_mode: u8,
    pub active: Characteristic<Active>,
    pub active_identifier: Characteristic<u32>,
    /// Instance ids of the linked input sources
    pub linked: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSource {
    pub iid: u64,
    pub name: String,
    pub configured_name: String,
    pub source_type: u8,
    pub is_configured: u8,
    /// Absent when the application id was not a non-negative integer
    pub identifier: Option<u32>,
}

impl InputSource {
    /// Instance id of the `offset`-th characteristic in this input's block
    pub fn child_iid(&self, offset: u64) -> u64 {
        self.iid + offset
    }
}

/// One television accessory: an information service, a television service and
/// its linked input sources. The service set is fixed at construction.
pub struct Accessory {
    pub info: AccessoryInfo,
    pub television: TelevisionService,
    pub inputs: Vec<InputSource>,
    handler: Arc<dyn TelevisionHandler>,
}

impl Accessory {
    pub(super) fn new(
        info: AccessoryInfo,
        television: TelevisionService,
        inputs: Vec<InputSource>,
        handler: Arc<dyn TelevisionHandler>,
    ) -> Self {
        Self {
            info,
            television,
            inputs,
            handler,
        }
    }

    pub fn handler(&self) -> &Arc<dyn TelevisionHandler> {
        &self.handler
    }

    /// Input source that can be selected with the given active identifier
    pub fn input_by_identifier(&self, identifier: u32) -> Option<&InputSource> {
        self.inputs.iter().find(|input| input.identifier == Some(identifier))
    }
}

impl fmt::Debug for Accessory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accessory")
            .field("info", &self.info)
            .field("television", &self.television)
            .field("inputs", &self.inputs)
            .finish_non_exhaustive()
    }
}
