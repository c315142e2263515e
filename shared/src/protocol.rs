/// SSDP multicast group and port
pub const SSDP_ADDR: &str = "239.255.255.250:1900";

/// SSDP search target answered by ECP devices
pub const ECP_SEARCH_TARGET: &str = "roku:ecp";

/// ECP query paths
pub const ECP_DEVICE_INFO: &str = "query/device-info";
pub const ECP_APPS: &str = "query/apps";
pub const ECP_ACTIVE_APP: &str = "query/active-app";
pub const ECP_KEYPRESS: &str = "keypress";
pub const ECP_LAUNCH: &str = "launch";

/// mDNS service type for HomeKit accessory advertisement
pub const HAP_SERVICE_TYPE: &str = "_hap._tcp.local.";

/// TXT record keys used in HomeKit advertisement
pub const TXT_CONFIG_NUMBER: &str = "c#";
pub const TXT_FEATURE_FLAGS: &str = "ff";
pub const TXT_DEVICE_ID: &str = "id";
pub const TXT_MODEL: &str = "md";
pub const TXT_PROTOCOL_VERSION: &str = "pv";
pub const TXT_STATE_NUMBER: &str = "s#";
pub const TXT_STATUS_FLAGS: &str = "sf";
pub const TXT_CATEGORY: &str = "ci";

/// HomeKit accessory category for televisions
pub const CATEGORY_TELEVISION: u8 = 31;
