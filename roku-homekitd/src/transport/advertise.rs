use std::collections::HashMap;
use std::sync::Mutex;
use anyhow::{Context, Result};
use mdns_sd::{ServiceDaemon, ServiceInfo};
use shared::protocol::{
    CATEGORY_TELEVISION, HAP_SERVICE_TYPE, TXT_CATEGORY, TXT_CONFIG_NUMBER, TXT_DEVICE_ID,
    TXT_FEATURE_FLAGS, TXT_MODEL, TXT_PROTOCOL_VERSION, TXT_STATE_NUMBER, TXT_STATUS_FLAGS,
};
use super::lock;

/// What a controller needs to find and pair with an accessory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub device_id: String,
    pub config_number: u32,
    pub model: String,
    pub paired: bool,
}

impl Advertisement {
    pub fn txt_records(&self) -> HashMap<String, String> {
        HashMap::from([
            (TXT_CONFIG_NUMBER.to_string(), self.config_number.to_string()),
            (TXT_FEATURE_FLAGS.to_string(), "0".to_string()),
            (TXT_DEVICE_ID.to_string(), self.device_id.clone()),
            (TXT_MODEL.to_string(), self.model.clone()),
            (TXT_PROTOCOL_VERSION.to_string(), "1.1".to_string()),
            (TXT_STATE_NUMBER.to_string(), "1".to_string()),
            (TXT_STATUS_FLAGS.to_string(), if self.paired { "0" } else { "1" }.to_string()),
            (TXT_CATEGORY.to_string(), CATEGORY_TELEVISION.to_string()),
        ])
    }
}

pub fn service_info(instance_name: &str, port: u16, advertisement: &Advertisement) -> Result<ServiceInfo> {
    let hostname = hostname::get()
        .context("Failed to get system hostname")?
        .to_string_lossy()
        .to_string();
    let host = format!("{}.local.", hostname.trim_end_matches(".local").trim_end_matches('.'));

    let service_info = ServiceInfo::new(
        HAP_SERVICE_TYPE,
        instance_name,
        &host,
        (),
        port,
        advertisement.txt_records(),
    )
    .context("Failed to create ServiceInfo")?
    .enable_addr_auto();

    Ok(service_info)
}

struct Published {
    advertisement: Advertisement,
    fullname: Option<String>,
}

/// Keeps one accessory's mDNS record in step with its pairing state
pub struct Advertiser {
    daemon: ServiceDaemon,
    instance_name: String,
    port: u16,
    state: Mutex<Published>,
}

impl Advertiser {
    pub fn new(daemon: ServiceDaemon, instance_name: &str, port: u16, advertisement: Advertisement) -> Self {
        Self {
            daemon,
            instance_name: instance_name.to_string(),
            port,
            state: Mutex::new(Published {
                advertisement,
                fullname: None,
            }),
        }
    }

    pub fn register(&self) -> Result<()> {
        let mut state = lock(&self.state);
        self.publish(&mut state)
    }

    fn publish(&self, state: &mut Published) -> Result<()> {
        let service_info = service_info(&self.instance_name, self.port, &state.advertisement)?;
        let fullname = service_info.get_fullname().to_string();

        self.daemon
            .register(service_info)
            .context("Failed to register mDNS service")?;

        tracing::info!(
            "Registered {} on port {} (sf={})",
            fullname,
            self.port,
            if state.advertisement.paired { 0 } else { 1 }
        );
        state.fullname = Some(fullname);
        Ok(())
    }

    /// Update the status flag. Re-announces only if already registered and the flag changed.
    pub fn set_paired(&self, paired: bool) -> Result<()> {
        let mut state = lock(&self.state);
        if state.advertisement.paired == paired {
            return Ok(());
        }

        state.advertisement.paired = paired;
        if state.fullname.is_some() {
            self.publish(&mut state)?;
        }
        Ok(())
    }

    pub fn unregister(&self) -> Result<()> {
        let Some(fullname) = lock(&self.state).fullname.take() else {
            return Ok(());
        };

        self.daemon
            .unregister(&fullname)
            .context("Failed to unregister mDNS service")?;

        tracing::info!("Unregistered {}", fullname);
        Ok(())
    }
}
