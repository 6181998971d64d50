/// mDNS service type for registry self-advertisement
pub const REGISTRY_SERVICE_TYPE: &str = "_srp-registry._udp.local.";

/// TXT record keys used in registry self-advertisement
pub const TXT_DOMAIN: &str = "domain";
pub const TXT_ADDRESS_MODE: &str = "mode";
pub const TXT_SEQUENCE_NUMBER: &str = "seq";

/// Domain hosts register under unless configured otherwise
pub const DEFAULT_DOMAIN: &str = "default.service.arpa.";

/// API path prefix
pub const API_PREFIX: &str = "/v1";
