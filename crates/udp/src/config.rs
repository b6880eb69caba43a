use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct UdpConfig {
    /// Address the request socket binds to.
    pub bind_host: String,
    /// Port the panel sends commands to.
    pub request_port: u16,
    /// Port on the panel side that progress/heartbeat events are sent to.
    pub event_port: u16,
    /// Receive timeout; bounds how long shutdown takes to be observed.
    pub recv_timeout: Duration,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            request_port: 10002,
            event_port: 10003,
            recv_timeout: Duration::from_secs(3),
        }
    }
}

impl UdpConfig {
    pub fn from_env() -> Self {
        let mut cfg = UdpConfig::default();

        if let Ok(v) = env::var("RUSTTUNE_BIND") {
            if !v.is_empty() {
                cfg.bind_host = v;
            }
        }
        if let Ok(v) = env::var("RUSTTUNE_REQUEST_PORT") {
            if let Ok(p) = v.parse::<u16>() {
                cfg.request_port = p;
            }
        }
        if let Ok(v) = env::var("RUSTTUNE_EVENT_PORT") {
            if let Ok(p) = v.parse::<u16>() {
                cfg.event_port = p;
            }
        }
        if let Ok(v) = env::var("RUSTTUNE_RECV_TIMEOUT_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                cfg.recv_timeout = Duration::from_millis(ms);
            }
        }

        cfg
    }
}
