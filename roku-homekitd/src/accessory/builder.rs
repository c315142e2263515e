use std::sync::Arc;
use shared::types::{AppEntry, DeviceIdentity};
use super::model::{
    iid, Accessory, AccessoryInfo, Active, Characteristic, InputSource, TelevisionService,
    INPUT_SOURCE_TYPE_APPLICATION, IS_CONFIGURED, SLEEP_DISCOVERY_ALWAYS_DISCOVERABLE,
};
use super::TelevisionHandler;

/// Build the television accessory for a device.
///
/// Every application becomes a linked input source; those whose id is not a
/// non-negative integer are listed without an identifier. `handler` receives
/// the television's characteristic callbacks.
pub fn build(
    identity: &DeviceIdentity,
    apps: &[AppEntry],
    handler: Arc<dyn TelevisionHandler>,
) -> Accessory {
    let identity = identity.sanitized();

    let info = AccessoryInfo {
        name: identity.user_device_name.clone(),
        manufacturer: identity.vendor_name.clone(),
        model: identity.model(),
        firmware_revision: identity.firmware(),
        serial_number: identity.serial_number.clone(),
    };

    let inputs: Vec<InputSource> = apps
        .iter()
        .enumerate()
        .map(|(i, app)| input_source(iid::FIRST_INPUT + i as u64 * iid::INPUT_BLOCK, app))
        .collect();

    let television = TelevisionService {
        configured_name: identity.user_device_name.clone(),
        sleep_discovery_mode: SLEEP_DISCOVERY_ALWAYS_DISCOVERABLE,
        active: Characteristic::new(Active::from_power_mode(&identity.power_mode)),
        active_identifier: Characteristic::new(0),
        linked: inputs.iter().map(|input| input.iid).collect(),
    };

    tracing::debug!(
        "Built accessory {:?} with {} input sources",
        info.name,
        inputs.len()
    );

    Accessory::new(info, television, inputs, handler)
}

fn input_source(iid: u64, app: &AppEntry) -> InputSource {
    let identifier = app.numeric_id();
    if identifier.is_none() {
        tracing::debug!("App {:?} has non-numeric id {:?}, publishing without identifier", app.name, app.id);
    }

    InputSource {
        iid,
        name: app.name.clone(),
        configured_name: app.name.clone(),
        source_type: INPUT_SOURCE_TYPE_APPLICATION,
        is_configured: IS_CONFIGURED,
        identifier,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Handler that answers reads with fixed values and drops writes
    pub(crate) struct NullHandler;

    #[async_trait]
    impl TelevisionHandler for NullHandler {
        async fn get_active(&self) -> Active {
            Active::Inactive
        }
        async fn set_active(&self, _active: Active) {}
        async fn get_active_identifier(&self) -> u32 {
            0
        }
        async fn set_active_identifier(&self, _identifier: u32) {}
        async fn set_remote_key(&self, _code: u8) {}
        async fn identify(&self) {}
    }

    pub(crate) fn identity() -> DeviceIdentity {
        DeviceIdentity {
            vendor_name: "Roku".to_string(),
            friendly_model_name: "Roku Ultra".to_string(),
            model_number: "4800X".to_string(),
            software_version: "11.5.0".to_string(),
            software_build: "4312".to_string(),
            serial_number: "YH00AB123456".to_string(),
            user_device_name: r#"Living "Room" TV"#.to_string(),
            power_mode: "PowerOn".to_string(),
        }
    }

    pub(crate) fn app(name: &str, id: &str) -> AppEntry {
        AppEntry {
            name: name.to_string(),
            id: id.to_string(),
        }
    }

    #[test]
    fn test_accessory_info() {
        let accessory = build(&identity(), &[], Arc::new(NullHandler));

        assert_eq!(
            accessory.info,
            AccessoryInfo {
                name: "Living Room TV".to_string(),
                manufacturer: "Roku".to_string(),
                model: "Roku Ultra (4800X)".to_string(),
                firmware_revision: "11.5.0-4312".to_string(),
                serial_number: "YH00AB123456".to_string(),
            }
        );
        assert_eq!(accessory.television.configured_name, "Living Room TV");
        assert_eq!(
            accessory.television.sleep_discovery_mode,
            SLEEP_DISCOVERY_ALWAYS_DISCOVERABLE
        );
        assert_eq!(accessory.television.active.value(), Active::Active);
        assert!(accessory.inputs.is_empty());
    }

    #[test]
    fn test_inputs_keep_numeric_identifiers() {
        let apps = [app("Netflix", "12"), app("YouTube", "837"), app("Home", "0")];
        let accessory = build(&identity(), &apps, Arc::new(NullHandler));

        let ids: Vec<_> = accessory.inputs.iter().map(|i| i.identifier).collect();
        assert_eq!(ids, vec![Some(12), Some(837), Some(0)]);
        assert_eq!(accessory.input_by_identifier(837).unwrap().name, "YouTube");
    }

    #[test]
    fn test_unparseable_identifier_is_listed_but_not_selectable() {
        let apps = [app("Netflix", "12"), app("Mystery", ""), app("HDMI 1", "tvinput.hdmi1")];
        let accessory = build(&identity(), &apps, Arc::new(NullHandler));

        assert_eq!(accessory.inputs.len(), 3);
        assert_eq!(accessory.inputs[1].name, "Mystery");
        assert_eq!(accessory.inputs[1].identifier, None);
        assert_eq!(accessory.inputs[2].identifier, None);
        assert_eq!(accessory.television.linked.len(), 3);
    }

    #[test]
    fn test_inputs_are_linked_and_configured() {
        let apps = [app("Netflix", "12"), app("Hulu", "2285")];
        let accessory = build(&identity(), &apps, Arc::new(NullHandler));

        assert_eq!(accessory.television.linked, vec![14, 20]);
        for input in &accessory.inputs {
            assert_eq!(input.configured_name, input.name);
            assert_eq!(input.source_type, INPUT_SOURCE_TYPE_APPLICATION);
            assert_eq!(input.is_configured, IS_CONFIGURED);
        }
    }
}
