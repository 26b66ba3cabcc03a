use std::env;

/// Centralized runtime configuration, overridable via environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    pub nickname: Option<String>,
    pub interface_ip: Option<String>,
    pub port: u16,
    pub broadcast_ip: String,
    pub ui_host: String,
    pub ui_port: u16,
    pub debug: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            nickname: None,
            interface_ip: None,
            port: 54545,
            broadcast_ip: "255.255.255.255".to_string(),
            ui_host: "127.0.0.1".to_string(),
            ui_port: 5000,
            debug: false,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let defaults = Settings::default();

        let port = env::var("ANONCHAT_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(defaults.port);

        let ui_port = env::var("ANONCHAT_UI_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(defaults.ui_port);

        Settings {
            nickname: env::var("ANONCHAT_NICKNAME").ok(),
            interface_ip: env::var("ANONCHAT_INTERFACE_IP").ok(),
            port,
            broadcast_ip: env::var("ANONCHAT_BROADCAST_IP").unwrap_or(defaults.broadcast_ip),
            ui_host: env::var("ANONCHAT_UI_HOST").unwrap_or(defaults.ui_host),
            ui_port,
            debug: env::var("ANONCHAT_DEBUG").map(|v| v == "1").unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = Settings::default();
        assert_eq!(s.port, 54545);
        assert_eq!(s.broadcast_ip, "255.255.255.255");
        assert_eq!(s.ui_host, "127.0.0.1");
        assert_eq!(s.ui_port, 5000);
        assert!(s.nickname.is_none());
        assert!(!s.debug);
    }

    #[test]
    fn malformed_port_env_falls_back_to_default() {
        env::set_var("ANONCHAT_PORT", "not-a-number");
        let s = Settings::from_env();
        assert_eq!(s.port, 54545);
        env::remove_var("ANONCHAT_PORT");
    }
}
