use std::env;
use std::time::Duration;

use tracing::warn;

use rusttune_core::PinDescriptor;
use rusttune_udp::UdpConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub udp: UdpConfig,
    /// Liveness beacon cadence.
    pub heartbeat_period: Duration,
    /// Pulse-width range (low, high) per servo; panel can override at runtime.
    pub tx_pulse: (u16, u16),
    pub ant_pulse: (u16, u16),
    /// Dwell between steps of a relay diagnostic cycle.
    pub relay_dwell: Duration,
    /// Settle time between tearing the unit down on `reset` and rebuilding it.
    pub reset_settle: Duration,
    /// Persisted pin map applied to the relay bank at startup.
    pub pin_map: Vec<PinDescriptor>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            udp: UdpConfig::default(),
            heartbeat_period: Duration::from_millis(500),
            tx_pulse: (600, 2000),
            ant_pulse: (600, 2000),
            relay_dwell: Duration::from_secs(2),
            reset_settle: Duration::from_secs(1),
            pin_map: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut cfg = Config::default();
        cfg.udp = UdpConfig::from_env();

        if let Some(ms) = env_u64("RUSTTUNE_HEARTBEAT_MS") {
            cfg.heartbeat_period = Duration::from_millis(ms);
        }
        if let Some(v) = env_u16("RUSTTUNE_TX_PWM_LOW") {
            cfg.tx_pulse.0 = v;
        }
        if let Some(v) = env_u16("RUSTTUNE_TX_PWM_HIGH") {
            cfg.tx_pulse.1 = v;
        }
        if let Some(v) = env_u16("RUSTTUNE_ANT_PWM_LOW") {
            cfg.ant_pulse.0 = v;
        }
        if let Some(v) = env_u16("RUSTTUNE_ANT_PWM_HIGH") {
            cfg.ant_pulse.1 = v;
        }
        if let Some(ms) = env_u64("RUSTTUNE_RELAY_DWELL_MS") {
            cfg.relay_dwell = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("RUSTTUNE_RESET_SETTLE_MS") {
            cfg.reset_settle = Duration::from_millis(ms);
        }
        if let Ok(v) = env::var("RUSTTUNE_PIN_MAP") {
            cfg.pin_map = parse_pin_map(&v);
        }

        cfg
    }
}

/// `"4,17i,27"`: comma-separated BCM pins, `i` suffix marking active-low.
/// Unparseable entries are skipped with a warning rather than failing startup.
pub fn parse_pin_map(raw: &str) -> Vec<PinDescriptor> {
    let mut pins = Vec::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (number, inverted) = match entry.strip_suffix(['i', 'I']) {
            Some(number) => (number, true),
            None => (entry, false),
        };
        match number.parse::<u8>() {
            Ok(pin) => pins.push(PinDescriptor { pin, inverted }),
            Err(_) => warn!(entry, "ignoring unparseable pin map entry"),
        }
    }
    pins
}

fn env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_u16(key: &str) -> Option<u16> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_map_parses_inversion_suffix() {
        assert_eq!(
            parse_pin_map("4,17i, 27 "),
            vec![
                PinDescriptor {
                    pin: 4,
                    inverted: false
                },
                PinDescriptor {
                    pin: 17,
                    inverted: true
                },
                PinDescriptor {
                    pin: 27,
                    inverted: false
                },
            ]
        );
    }

    #[test]
    fn pin_map_skips_garbage() {
        assert_eq!(
            parse_pin_map("x,300,,5"),
            vec![PinDescriptor {
                pin: 5,
                inverted: false
            }]
        );
    }

    #[test]
    fn defaults_match_the_reference_unit() {
        let cfg = Config::default();
        assert_eq!(cfg.udp.request_port, 10002);
        assert_eq!(cfg.udp.event_port, 10003);
        assert_eq!(cfg.tx_pulse, (600, 2000));
        assert!(cfg.pin_map.is_empty());
    }
}
