use serde::Serialize;
use sha2::{Digest, Sha256};
use crate::accessory::Accessory;

/// Stable view of the accessory database. Live characteristic values are left
/// out: they change constantly and are not part of the schema controllers cache.
#[derive(Serialize)]
struct SchemaView<'a> {
    name: &'a str,
    manufacturer: &'a str,
    model: &'a str,
    firmware_revision: &'a str,
    serial_number: &'a str,
    configured_name: &'a str,
    linked: &'a [u64],
    inputs: Vec<InputView<'a>>,
}

#[derive(Serialize)]
struct InputView<'a> {
    iid: u64,
    name: &'a str,
    identifier: Option<u32>,
}

/// SHA-256 of the accessory schema, hex encoded
pub fn compute_hash(accessory: &Accessory) -> String {
    let view = SchemaView {
        name: &accessory.info.name,
        manufacturer: &accessory.info.manufacturer,
        model: &accessory.info.model,
        firmware_revision: &accessory.info.firmware_revision,
        serial_number: &accessory.info.serial_number,
        configured_name: &accessory.television.configured_name,
        linked: &accessory.television.linked,
        inputs: accessory
            .inputs
            .iter()
            .map(|input| InputView {
                iid: input.iid,
                name: &input.name,
                identifier: input.identifier,
            })
            .collect(),
    };

    let json = serde_json::to_vec(&view).unwrap_or_default();
    hex::encode(Sha256::digest(&json))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::accessory::builder::tests::{app, identity, NullHandler};
    use crate::accessory::{build, Active};

    #[test]
    fn test_hash_deterministic() {
        let apps = [app("Netflix", "12"), app("Hulu", "2285")];
        let a = build(&identity(), &apps, Arc::new(NullHandler));
        let b = build(&identity(), &apps, Arc::new(NullHandler));

        assert_eq!(compute_hash(&a), compute_hash(&b));
    }

    #[test]
    fn test_hash_changes_when_apps_change() {
        let a = build(&identity(), &[app("Netflix", "12")], Arc::new(NullHandler));
        let b = build(&identity(), &[app("Netflix", "12"), app("Hulu", "2285")], Arc::new(NullHandler));

        assert_ne!(compute_hash(&a), compute_hash(&b));
    }

    #[test]
    fn test_hash_stable_across_live_state_changes() {
        let accessory = build(&identity(), &[app("Netflix", "12")], Arc::new(NullHandler));
        let before = compute_hash(&accessory);

        accessory.television.active.set_value(Active::Inactive);
        accessory.television.active_identifier.set_value(12);

        assert_eq!(before, compute_hash(&accessory));
    }
}
