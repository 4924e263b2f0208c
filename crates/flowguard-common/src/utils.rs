//! Utility functions for Flowguard

use std::sync::LazyLock;

use if_addrs::IfAddr;

/// Application names end up inside configuration data ids and cache keys.
static VALID_PATTERN: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new("^[a-zA-Z0-9_.:-]+$").expect("Invalid regex pattern"));

/// Validate an application name
///
/// Allowed characters: alphanumeric, underscore, dot, colon, hyphen.
/// Empty names are rejected.
///
/// # Examples
///
/// ```
/// use flowguard_common::is_valid;
///
/// assert!(is_valid("orderService"));
/// assert!(is_valid("payment-gateway.v2"));
/// assert!(!is_valid(""));
/// assert!(!is_valid("orders/v1"));
/// ```
pub fn is_valid(str: &str) -> bool {
    VALID_PATTERN.is_match(str)
}

/// Get the local IP address
///
/// Returns the first non-loopback IPv4 address found,
/// or "127.0.0.1" as fallback.
pub fn local_ip() -> String {
    if_addrs::get_if_addrs()
        .ok()
        .and_then(|addrs| {
            addrs
                .into_iter()
                .find(|iface| !iface.is_loopback() && matches!(iface.addr, IfAddr::V4(_)))
                .and_then(|iface| match iface.addr {
                    IfAddr::V4(addr) => Some(addr.ip.to_string()),
                    _ => None,
                })
        })
        .unwrap_or_else(|| "127.0.0.1".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_app_names() {
        assert!(is_valid("orderService"));
        assert!(is_valid("order_service"));
        assert!(is_valid("order-service"));
        assert!(is_valid("order.service"));
        assert!(is_valid("order:service"));
    }

    #[test]
    fn test_is_valid_rejects() {
        assert!(!is_valid(""));
        assert!(!is_valid("order service"));
        assert!(!is_valid("order/service"));
        assert!(!is_valid("order@service"));
    }

    #[test]
    fn test_local_ip_returns_valid_ip() {
        let ip = local_ip();
        assert!(
            ip == "127.0.0.1" || ip.split('.').filter_map(|s| s.parse::<u8>().ok()).count() == 4
        );
    }
}
