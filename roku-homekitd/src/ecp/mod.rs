//! External Control Protocol client.
//!
//! Queries are plain `GET`s returning XML; commands are bodiless `POST`s.

pub mod xml;

use std::time::Duration;
use async_trait::async_trait;
use shared::protocol::{ECP_ACTIVE_APP, ECP_APPS, ECP_DEVICE_INFO, ECP_KEYPRESS, ECP_LAUNCH};
use shared::types::{AppEntry, DeviceHandle, DeviceIdentity};
use crate::device::{DeviceClient, DeviceError, Key, Result};

/// Upper bound enforced by the HTTP transport on every call
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// [`DeviceClient`] speaking ECP to one device.
#[derive(Debug, Clone)]
pub struct EcpClient {
    base_url: String,
    http: reqwest::Client,
}

impl EcpClient {
    pub fn new(handle: &DeviceHandle) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| DeviceError::unreachable("client setup", e))?;

        Ok(Self::with_http(&handle.location, http))
    }

    fn with_http(location: &str, http: reqwest::Client) -> Self {
        Self {
            base_url: location.trim_end_matches('/').to_string(),
            http,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn query(&self, operation: &'static str, path: &str) -> Result<String> {
        self.http
            .get(self.url(path))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| DeviceError::unreachable(operation, e))?
            .text()
            .await
            .map_err(|e| DeviceError::unreachable(operation, e))
    }

    async fn post(&self, operation: &'static str, path: &str) -> Result<()> {
        self.http
            .post(self.url(path))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| DeviceError::unreachable(operation, e))?;
        Ok(())
    }
}

#[async_trait]
impl DeviceClient for EcpClient {
    async fn device_info(&self) -> Result<DeviceIdentity> {
        let body = self.query("device-info", ECP_DEVICE_INFO).await?;
        xml::parse_device_info(&body).map_err(|e| DeviceError::unreachable("device-info", e))
    }

    async fn apps(&self) -> Result<Vec<AppEntry>> {
        let body = self.query("apps", ECP_APPS).await?;
        xml::parse_apps(&body).map_err(|e| DeviceError::unreachable("apps", e))
    }

    async fn active_app(&self) -> Result<AppEntry> {
        let body = self.query("active-app", ECP_ACTIVE_APP).await?;
        xml::parse_active_app(&body).map_err(|e| DeviceError::unreachable("active-app", e))
    }

    async fn send_key(&self, key: Key) -> Result<()> {
        self.post("keypress", &format!("{}/{}", ECP_KEYPRESS, key)).await
    }

    async fn launch(&self, id: &str) -> Result<()> {
        self.post("launch", &format!("{}/{}", ECP_LAUNCH, id)).await
    }

    async fn find_remote(&self) -> Result<()> {
        self.send_key(Key::FindRemote).await
    }
}
