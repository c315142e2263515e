//! HomeKit accessory database in its JSON form, and dispatch of characteristic
//! reads and writes to the accessory's [`TelevisionHandler`](crate::accessory::TelevisionHandler).

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use crate::accessory::model::{iid, AID};
use crate::accessory::{Accessory, Active};

const PR: &str = "pr";
const PW: &str = "pw";
const EV: &str = "ev";

/// HAP status: the request needs a verified or unpaired accessory
pub const STATUS_INSUFFICIENT_PRIVILEGES: i32 = -70401;
/// HAP status: the addressed characteristic does not exist
pub const STATUS_NOT_FOUND: i32 = -70409;

#[derive(Debug, Serialize)]
pub struct CharacteristicJson {
    pub iid: u64,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub perms: &'static [&'static str],
    pub format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct ServiceJson {
    pub iid: u64,
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub primary: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub linked: Vec<u64>,
    pub characteristics: Vec<CharacteristicJson>,
}

fn characteristic(
    iid: u64,
    kind: &'static str,
    perms: &'static [&'static str],
    format: &'static str,
    value: Option<Value>,
) -> CharacteristicJson {
    CharacteristicJson {
        iid,
        kind,
        perms,
        format,
        value,
    }
}

/// All services of the accessory with their current cached values
pub fn services(accessory: &Accessory) -> Vec<ServiceJson> {
    let info = &accessory.info;
    let tv = &accessory.television;

    let mut services = vec![
        ServiceJson {
            iid: iid::INFO_SERVICE,
            kind: "3E",
            primary: false,
            linked: Vec::new(),
            characteristics: vec![
                characteristic(iid::IDENTIFY, "14", &[PW], "bool", None),
                characteristic(iid::MANUFACTURER, "20", &[PR], "string", Some(json!(info.manufacturer))),
                characteristic(iid::MODEL, "21", &[PR], "string", Some(json!(info.model))),
                characteristic(iid::NAME, "23", &[PR], "string", Some(json!(info.name))),
                characteristic(iid::SERIAL_NUMBER, "30", &[PR], "string", Some(json!(info.serial_number))),
                characteristic(iid::FIRMWARE_REVISION, "52", &[PR], "string", Some(json!(info.firmware_revision))),
            ],
        },
        ServiceJson {
            iid: iid::TELEVISION_SERVICE,
            kind: "D8",
            primary: true,
            linked: tv.linked.clone(),
            characteristics: vec![
                characteristic(iid::ACTIVE, "B0", &[PR, PW, EV], "uint8", Some(json!(tv.active.value() as u8))),
                characteristic(iid::ACTIVE_IDENTIFIER, "E7", &[PR, PW, EV], "uint32", Some(json!(tv.active_identifier.value()))),
                characteristic(iid::CONFIGURED_NAME, "E3", &[PR, EV], "string", Some(json!(tv.configured_name))),
                characteristic(iid::SLEEP_DISCOVERY_MODE, "E8", &[PR, EV], "uint8", Some(json!(tv.sleep_discovery_mode))),
                characteristic(iid::REMOTE_KEY, "E1", &[PW], "uint8", None),
            ],
        },
    ];

    for input in &accessory.inputs {
        let mut characteristics = vec![
            characteristic(input.child_iid(1), "23", &[PR], "string", Some(json!(input.name))),
            characteristic(input.child_iid(2), "E3", &[PR, EV], "string", Some(json!(input.configured_name))),
            characteristic(input.child_iid(3), "DB", &[PR, EV], "uint8", Some(json!(input.source_type))),
            characteristic(input.child_iid(4), "D6", &[PR, EV], "uint8", Some(json!(input.is_configured))),
        ];
        if let Some(identifier) = input.identifier {
            characteristics.push(characteristic(input.child_iid(5), "E6", &[PR], "uint32", Some(json!(identifier))));
        }

        services.push(ServiceJson {
            iid: input.iid,
            kind: "D9",
            primary: false,
            linked: Vec::new(),
            characteristics,
        });
    }

    services
}

/// Body of an event notification for one changed characteristic
pub fn event_body(aid: u64, iid: u64, value: Value) -> Value {
    json!({ "characteristics": [{ "aid": aid, "iid": iid, "value": value }] })
}

/// `GET /accessories` body
pub fn accessory_database(accessory: &Accessory) -> Value {
    json!({
        "accessories": [{
            "aid": AID,
            "services": services(accessory),
        }]
    })
}

/// Read one characteristic. Active and ActiveIdentifier are queried live
/// through the handler; everything else comes from the model.
pub async fn read(accessory: &Accessory, aid: u64, iid: u64) -> Option<Value> {
    if aid != AID {
        return None;
    }

    let tv = &accessory.television;
    match iid {
        iid::ACTIVE => {
            let active = accessory.handler().get_active().await;
            tv.active.set_value(active);
            Some(json!(active as u8))
        }
        iid::ACTIVE_IDENTIFIER => {
            let identifier = accessory.handler().get_active_identifier().await;
            tv.active_identifier.set_value(identifier);
            Some(json!(identifier))
        }
        _ => services(accessory)
            .into_iter()
            .flat_map(|s| s.characteristics)
            .find(|c| c.iid == iid)
            .and_then(|c| c.value),
    }
}

/// Write one characteristic. Returns false when nothing handles the write or
/// the value is out of range; the caller reports success either way.
pub async fn write(accessory: &Accessory, aid: u64, iid: u64, value: &Value) -> bool {
    if aid != AID {
        return false;
    }

    let handler = accessory.handler();
    match iid {
        iid::ACTIVE => match as_u8(value).and_then(Active::from_value) {
            Some(active) => {
                handler.set_active(active).await;
                true
            }
            None => false,
        },
        iid::ACTIVE_IDENTIFIER => match value.as_u64().and_then(|v| u32::try_from(v).ok()) {
            Some(identifier) => {
                if let Some(input) = accessory.input_by_identifier(identifier) {
                    tracing::debug!("Selecting input {:?} on {:?}", input.name, accessory.info.name);
                }
                handler.set_active_identifier(identifier).await;
                true
            }
            None => false,
        },
        iid::REMOTE_KEY => match as_u8(value) {
            Some(code) => {
                handler.set_remote_key(code).await;
                true
            }
            None => false,
        },
        iid::IDENTIFY => {
            handler.identify().await;
            true
        }
        _ => false,
    }
}

fn as_u8(value: &Value) -> Option<u8> {
    value.as_u64().and_then(|v| u8::try_from(v).ok())
}

/// One entry of a `PUT /characteristics` body
#[derive(Debug, Deserialize)]
pub struct WriteItem {
    pub aid: u64,
    pub iid: u64,
    #[serde(default)]
    pub value: Option<Value>,
    /// Turns event notifications on or off for this characteristic
    #[serde(default)]
    pub ev: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct WriteRequest {
    pub characteristics: Vec<WriteItem>,
}

/// One entry of a `GET /characteristics` response
#[derive(Debug, Serialize)]
pub struct ReadItem {
    pub aid: u64,
    pub iid: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<i32>,
}

/// Parse "1.9,1.10" into (aid, iid) pairs, skipping malformed entries
pub fn parse_ids(ids: &str) -> Vec<(u64, u64)> {
    ids.split(',')
        .filter_map(|pair| {
            let (aid, iid) = pair.trim().split_once('.')?;
            Some((aid.parse().ok()?, iid.parse().ok()?))
        })
        .collect()
}
