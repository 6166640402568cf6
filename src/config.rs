//! Client configuration.

use crate::connection::IpVersion;
use std::time::Duration;

/// The default time out of single-result transactions is 3 seconds.
pub const TRANSACTION_TIMEOUT_DEFAULT: Duration = Duration::from_secs(3);

/// Which sockets an outgoing query goes out on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum SendPolicy {
    /// Every bound family, i.e. both IPv4 and IPv6 when both are bound.
    AllFamilies,

    /// Only the first bound family in [MdnsConfig::ip_versions] order.
    FirstAvailable,
}

/// Options of [MdnsClient](crate::MdnsClient).
///
/// ```
/// use mdns_client::{IpVersion, MdnsConfig, SendPolicy};
/// use std::time::Duration;
///
/// let config = MdnsConfig::default()
///     .with_ip_versions(vec![IpVersion::V4])
///     .with_send_policy(SendPolicy::FirstAvailable)
///     .with_transaction_timeout(Duration::from_secs(1));
/// assert_eq!(config.ip_versions(), &[IpVersion::V4]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MdnsConfig {
    transaction_timeout: Duration,
    ip_versions: Vec<IpVersion>,
    send_policy: SendPolicy,
    require_all_families: bool,
    multicast_loop: bool,
}

impl Default for MdnsConfig {
    fn default() -> Self {
        Self {
            transaction_timeout: TRANSACTION_TIMEOUT_DEFAULT,
            ip_versions: vec![IpVersion::V4, IpVersion::V6],
            send_policy: SendPolicy::AllFamilies,
            require_all_families: false,
            multicast_loop: true,
        }
    }
}

impl MdnsConfig {
    /// Timeout of single-result transactions that do not set their own.
    pub fn with_transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = timeout;
        self
    }

    /// IP families to bind, in preference order.
    pub fn with_ip_versions(mut self, ip_versions: Vec<IpVersion>) -> Self {
        self.ip_versions = ip_versions;
        self
    }

    pub fn with_send_policy(mut self, send_policy: SendPolicy) -> Self {
        self.send_policy = send_policy;
        self
    }

    /// If true, failing to bind any one family fails the whole connection
    /// instead of running on the remaining families.
    pub fn with_require_all_families(mut self, require: bool) -> Self {
        self.require_all_families = require;
        self
    }

    /// Whether our own multicast packets loop back to us. Only used by the
    /// socket factory of [EventLoop](crate::EventLoop).
    pub fn with_multicast_loop(mut self, on: bool) -> Self {
        self.multicast_loop = on;
        self
    }

    pub fn transaction_timeout(&self) -> Duration {
        self.transaction_timeout
    }

    pub fn ip_versions(&self) -> &[IpVersion] {
        &self.ip_versions
    }

    pub fn send_policy(&self) -> SendPolicy {
        self.send_policy
    }

    pub fn require_all_families(&self) -> bool {
        self.require_all_families
    }

    pub fn multicast_loop(&self) -> bool {
        self.multicast_loop
    }
}
