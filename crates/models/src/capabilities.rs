use crate::CustomerId;

/// Per-customer feature flags and polling settings. One row per customer;
/// everything else the customer owns cascades from this row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerCapabilities {
    pub customer_id: CustomerId,
    pub supports_post_method: bool,
    pub supports_content_checking: bool,
    pub supports_keyword_checking: bool,
    pub supports_ping_based_polling: bool,
    pub supports_ssl_expiration_checking: bool,
    pub supports_latency_tracking: bool,
    pub supports_maintenance_mode: bool,
    pub multi_region_checking: bool,
    /// Seconds between probes of each monitor.
    pub polling_interval: u32,
    pub customer_active: bool,
    pub paused: bool,
}

impl Default for CustomerCapabilities {
    fn default() -> Self {
        CustomerCapabilities {
            customer_id: CustomerId::INVALID,
            supports_post_method: false,
            supports_content_checking: false,
            supports_keyword_checking: false,
            supports_ping_based_polling: false,
            supports_ssl_expiration_checking: false,
            supports_latency_tracking: false,
            supports_maintenance_mode: false,
            multi_region_checking: false,
            polling_interval: 60,
            customer_active: false,
            paused: false,
        }
    }
}
