//! ECP response bodies.

use serde::Deserialize;
use shared::types::{AppEntry, DeviceIdentity};

/// `GET /query/device-info`
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DeviceInfoXml {
    pub vendor_name: String,
    pub friendly_model_name: String,
    pub model_number: String,
    pub software_version: String,
    pub software_build: String,
    pub serial_number: String,
    pub user_device_name: String,
    pub power_mode: String,
}

impl From<DeviceInfoXml> for DeviceIdentity {
    fn from(xml: DeviceInfoXml) -> Self {
        Self {
            vendor_name: xml.vendor_name,
            friendly_model_name: xml.friendly_model_name,
            model_number: xml.model_number,
            software_version: xml.software_version,
            software_build: xml.software_build,
            serial_number: xml.serial_number,
            user_device_name: xml.user_device_name,
            power_mode: xml.power_mode,
        }
    }
}

/// `<app id="12" type="appl" version="4.2">Netflix</app>`
#[derive(Debug, Default, Deserialize)]
pub struct AppXml {
    #[serde(rename = "@id", default)]
    pub id: String,
    #[serde(rename = "$text", default)]
    pub name: String,
}

impl From<AppXml> for AppEntry {
    fn from(xml: AppXml) -> Self {
        Self {
            name: xml.name.trim().to_string(),
            id: xml.id,
        }
    }
}

/// `GET /query/apps`
#[derive(Debug, Default, Deserialize)]
pub struct AppsXml {
    #[serde(rename = "app", default)]
    pub apps: Vec<AppXml>,
}

/// `GET /query/active-app`. The home screen is reported as an app without an id.
#[derive(Debug, Default, Deserialize)]
pub struct ActiveAppXml {
    #[serde(default)]
    pub app: AppXml,
}

pub fn parse_device_info(xml: &str) -> Result<DeviceIdentity, quick_xml::DeError> {
    quick_xml::de::from_str::<DeviceInfoXml>(xml).map(Into::into)
}

pub fn parse_apps(xml: &str) -> Result<Vec<AppEntry>, quick_xml::DeError> {
    let apps: AppsXml = quick_xml::de::from_str(xml)?;
    Ok(apps.apps.into_iter().map(Into::into).collect())
}

pub fn parse_active_app(xml: &str) -> Result<AppEntry, quick_xml::DeError> {
    quick_xml::de::from_str::<ActiveAppXml>(xml).map(|active| active.app.into())
}
