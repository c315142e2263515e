//! The television accessory published for each device.

pub mod builder;
pub mod model;

use async_trait::async_trait;

pub use builder::build;
pub use model::{Accessory, Active, RemoteKey};

/// Callbacks the publishing transport invokes when a controller reads or writes
/// the television's characteristics.
///
/// Reads always produce a value and writes never fail: there is no error
/// channel back to the controlling app.
#[async_trait]
pub trait TelevisionHandler: Send + Sync {
    async fn get_active(&self) -> Active;

    async fn set_active(&self, active: Active);

    /// 0 means no input is known to be active
    async fn get_active_identifier(&self) -> u32;

    async fn set_active_identifier(&self, identifier: u32);

    /// Raw RemoteKey code. Codes outside the HomeKit set are ignored.
    async fn set_remote_key(&self, code: u8);

    async fn identify(&self);
}
