// Request wire format shared by the panel and the remote unit. A request datagram
// is a JSON `[kind, arguments]` pair, e.g. `["move",[45]]` or
// `["relay-set",[[4,false],[17,true]]]`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const HOME: &str = "home";
pub const MOVE: &str = "move";
pub const SET_PWM_RANGE: &str = "set-pwm-range";
pub const TEST_RANGE: &str = "test-range";
pub const ANT_HOME: &str = "ant-home";
pub const ANT_MOVE: &str = "ant-move";
pub const ANT_PWM_RANGE: &str = "ant-pwm-range";
pub const ANT_TEST_RANGE: &str = "ant-test-range";
pub const SETTINGS: &str = "settings";
pub const RELAY_INIT: &str = "relay-init";
pub const RELAY_SET: &str = "relay-set";
pub const RELAY_RESET: &str = "relay-reset";
pub const RELAY_CYCLE: &str = "relay-cycle";
pub const WAKEUP: &str = "wakeup";
pub const RESET: &str = "reset";

/// Every kind the remote unit understands. Unprefixed motion kinds address the
/// TX capacitor servo, `ant-*` kinds the antenna capacitor servo.
pub const KINDS: &[&str] = &[
    HOME,
    MOVE,
    SET_PWM_RANGE,
    TEST_RANGE,
    ANT_HOME,
    ANT_MOVE,
    ANT_PWM_RANGE,
    ANT_TEST_RANGE,
    SETTINGS,
    RELAY_INIT,
    RELAY_SET,
    RELAY_RESET,
    RELAY_CYCLE,
    WAKEUP,
    RESET,
];

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("undecodable frame: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("unknown command kind {0:?}")]
    UnknownKind(String),
    #[error("command {kind:?} expects {expected} argument(s), received {actual}")]
    Arity {
        kind: String,
        expected: Arity,
        actual: usize,
    },
    #[error("bad argument for {kind:?}: {reason}")]
    BadArgument { kind: String, reason: String },
}

/// Argument count contract for one command kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exactly(usize),
    AtLeast(usize),
}

impl Arity {
    fn check(self, kind: &str, actual: usize) -> Result<(), ProtocolError> {
        let ok = match self {
            Arity::Exactly(n) => actual == n,
            Arity::AtLeast(n) => actual >= n,
        };
        if ok {
            Ok(())
        } else {
            Err(ProtocolError::Arity {
                kind: kind.to_string(),
                expected: self,
                actual,
            })
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exactly(n) => write!(f, "{n}"),
            Arity::AtLeast(n) => write!(f, "at least {n}"),
        }
    }
}

/// The arity table. One row per kind; `None` means the kind is unknown.
pub fn arity_of(kind: &str) -> Option<Arity> {
    let arity = match kind {
        HOME | TEST_RANGE | ANT_HOME | ANT_TEST_RANGE | WAKEUP | RESET => Arity::Exactly(0),
        MOVE | ANT_MOVE => Arity::Exactly(1),
        SET_PWM_RANGE | ANT_PWM_RANGE | RELAY_CYCLE => Arity::Exactly(2),
        SETTINGS => Arity::Exactly(4),
        RELAY_INIT | RELAY_SET | RELAY_RESET => Arity::AtLeast(1),
        _ => return None,
    };
    Some(arity)
}

/// One relay output: BCM pin number plus its active level. An inverted pin is
/// energized by driving it LOW. Travels as a `[pin, inverted]` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(u8, bool)", into = "(u8, bool)")]
pub struct PinDescriptor {
    pub pin: u8,
    pub inverted: bool,
}

impl From<(u8, bool)> for PinDescriptor {
    fn from((pin, inverted): (u8, bool)) -> Self {
        Self { pin, inverted }
    }
}

impl From<PinDescriptor> for (u8, bool) {
    fn from(d: PinDescriptor) -> Self {
        (d.pin, d.inverted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleMode {
    /// One pin energized at a time, forward, then de-energized in reverse.
    Exclusive,
    /// Pins energized cumulatively without dropping the previous ones.
    Inclusive,
}

/// Servo motion tuning pushed from the panel. The track pair drives normal
/// smooth moves, the scan pair drives the test sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionSettings {
    pub track_inc: u8,
    pub track_delay_ms: u64,
    pub scan_inc: u8,
    pub scan_delay_ms: u64,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            track_inc: 1,
            track_delay_ms: 20,
            scan_inc: 1,
            scan_delay_ms: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Home,
    Move { angle: u8 },
    SetPwmRange { low: u16, high: u16 },
    TestRange,
    AntHome,
    AntMove { angle: u8 },
    AntSetPwmRange { low: u16, high: u16 },
    AntTestRange,
    Settings(MotionSettings),
    RelayInit(Vec<PinDescriptor>),
    RelaySet(Vec<PinDescriptor>),
    RelayReset(Vec<PinDescriptor>),
    RelayCycle {
        pins: Vec<PinDescriptor>,
        mode: CycleMode,
    },
    Wakeup,
    Reset,
}

impl Command {
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Home => HOME,
            Command::Move { .. } => MOVE,
            Command::SetPwmRange { .. } => SET_PWM_RANGE,
            Command::TestRange => TEST_RANGE,
            Command::AntHome => ANT_HOME,
            Command::AntMove { .. } => ANT_MOVE,
            Command::AntSetPwmRange { .. } => ANT_PWM_RANGE,
            Command::AntTestRange => ANT_TEST_RANGE,
            Command::Settings(_) => SETTINGS,
            Command::RelayInit(_) => RELAY_INIT,
            Command::RelaySet(_) => RELAY_SET,
            Command::RelayReset(_) => RELAY_RESET,
            Command::RelayCycle { .. } => RELAY_CYCLE,
            Command::Wakeup => WAKEUP,
            Command::Reset => RESET,
        }
    }

    pub fn decode(raw: &[u8]) -> Result<Self, ProtocolError> {
        let (kind, args): (String, Vec<Value>) = serde_json::from_slice(raw)?;
        Self::from_parts(&kind, args)
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let (kind, args) = self.to_parts();
        Ok(serde_json::to_vec(&(kind, args))?)
    }

    /// Validate against the arity table and extract typed arguments.
    pub fn from_parts(kind: &str, args: Vec<Value>) -> Result<Self, ProtocolError> {
        let arity = arity_of(kind).ok_or_else(|| ProtocolError::UnknownKind(kind.to_string()))?;
        arity.check(kind, args.len())?;

        let cmd = match kind {
            HOME => Command::Home,
            MOVE => Command::Move {
                angle: angle_arg(kind, &args[0])?,
            },
            SET_PWM_RANGE => Command::SetPwmRange {
                low: pulse_arg(kind, &args[0])?,
                high: pulse_arg(kind, &args[1])?,
            },
            TEST_RANGE => Command::TestRange,
            ANT_HOME => Command::AntHome,
            ANT_MOVE => Command::AntMove {
                angle: angle_arg(kind, &args[0])?,
            },
            ANT_PWM_RANGE => Command::AntSetPwmRange {
                low: pulse_arg(kind, &args[0])?,
                high: pulse_arg(kind, &args[1])?,
            },
            ANT_TEST_RANGE => Command::AntTestRange,
            SETTINGS => Command::Settings(MotionSettings {
                track_inc: int_arg(kind, &args[0], u64::from(u8::MAX))? as u8,
                track_delay_ms: int_arg(kind, &args[1], u64::MAX)?,
                scan_inc: int_arg(kind, &args[2], u64::from(u8::MAX))? as u8,
                scan_delay_ms: int_arg(kind, &args[3], u64::MAX)?,
            }),
            RELAY_INIT => Command::RelayInit(pin_list(kind, Value::Array(args))?),
            RELAY_SET => Command::RelaySet(pin_list(kind, Value::Array(args))?),
            RELAY_RESET => Command::RelayReset(pin_list(kind, Value::Array(args))?),
            RELAY_CYCLE => {
                let pins = pin_list(kind, args[0].clone())?;
                if pins.is_empty() {
                    return Err(ProtocolError::Arity {
                        kind: kind.to_string(),
                        expected: Arity::AtLeast(1),
                        actual: 0,
                    });
                }
                let mode: CycleMode = serde_json::from_value(args[1].clone()).map_err(|e| {
                    ProtocolError::BadArgument {
                        kind: kind.to_string(),
                        reason: format!("cycle mode: {e}"),
                    }
                })?;
                Command::RelayCycle { pins, mode }
            }
            WAKEUP => Command::Wakeup,
            RESET => Command::Reset,
            _ => unreachable!("kind covered by arity table"),
        };
        Ok(cmd)
    }

    fn to_parts(&self) -> (&'static str, Vec<Value>) {
        let kind = self.kind();
        let args = match self {
            Command::Home
            | Command::TestRange
            | Command::AntHome
            | Command::AntTestRange
            | Command::Wakeup
            | Command::Reset => Vec::new(),
            Command::Move { angle } | Command::AntMove { angle } => vec![json_u64(*angle)],
            Command::SetPwmRange { low, high } | Command::AntSetPwmRange { low, high } => {
                vec![json_u64(*low), json_u64(*high)]
            }
            Command::Settings(s) => vec![
                json_u64(s.track_inc),
                json_u64(s.track_delay_ms),
                json_u64(s.scan_inc),
                json_u64(s.scan_delay_ms),
            ],
            Command::RelayInit(pins) | Command::RelaySet(pins) | Command::RelayReset(pins) => {
                pins.iter().map(pin_value).collect()
            }
            Command::RelayCycle { pins, mode } => vec![
                Value::Array(pins.iter().map(pin_value).collect()),
                serde_json::to_value(mode).expect("cycle mode serializes"),
            ],
        };
        (kind, args)
    }
}

fn json_u64(n: impl Into<u64>) -> Value {
    Value::from(n.into())
}

fn pin_value(d: &PinDescriptor) -> Value {
    serde_json::to_value(d).expect("pin descriptor serializes")
}

fn int_arg(kind: &str, v: &Value, max: u64) -> Result<u64, ProtocolError> {
    let n = v.as_u64().ok_or_else(|| ProtocolError::BadArgument {
        kind: kind.to_string(),
        reason: format!("expected an unsigned integer, got {v}"),
    })?;
    if n > max {
        return Err(ProtocolError::BadArgument {
            kind: kind.to_string(),
            reason: format!("{n} exceeds the maximum of {max}"),
        });
    }
    Ok(n)
}

fn angle_arg(kind: &str, v: &Value) -> Result<u8, ProtocolError> {
    // Servo travel is 0..=180 degrees; anything else on the wire is corruption.
    Ok(int_arg(kind, v, 180)? as u8)
}

fn pulse_arg(kind: &str, v: &Value) -> Result<u16, ProtocolError> {
    Ok(int_arg(kind, v, u64::from(u16::MAX))? as u16)
}

fn pin_list(kind: &str, v: Value) -> Result<Vec<PinDescriptor>, ProtocolError> {
    serde_json::from_value(v).map_err(|e| ProtocolError::BadArgument {
        kind: kind.to_string(),
        reason: format!("pin list: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(kind: &str) -> Command {
        match kind {
            HOME => Command::Home,
            MOVE => Command::Move { angle: 45 },
            SET_PWM_RANGE => Command::SetPwmRange {
                low: 600,
                high: 2000,
            },
            TEST_RANGE => Command::TestRange,
            ANT_HOME => Command::AntHome,
            ANT_MOVE => Command::AntMove { angle: 180 },
            ANT_PWM_RANGE => Command::AntSetPwmRange {
                low: 500,
                high: 2400,
            },
            ANT_TEST_RANGE => Command::AntTestRange,
            SETTINGS => Command::Settings(MotionSettings {
                track_inc: 2,
                track_delay_ms: 30,
                scan_inc: 1,
                scan_delay_ms: 15,
            }),
            RELAY_INIT => Command::RelayInit(vec![PinDescriptor {
                pin: 4,
                inverted: false,
            }]),
            RELAY_SET => Command::RelaySet(vec![
                PinDescriptor {
                    pin: 4,
                    inverted: false,
                },
                PinDescriptor {
                    pin: 17,
                    inverted: true,
                },
            ]),
            RELAY_RESET => Command::RelayReset(vec![PinDescriptor {
                pin: 27,
                inverted: true,
            }]),
            RELAY_CYCLE => Command::RelayCycle {
                pins: vec![
                    PinDescriptor {
                        pin: 4,
                        inverted: false,
                    },
                    PinDescriptor {
                        pin: 17,
                        inverted: false,
                    },
                ],
                mode: CycleMode::Exclusive,
            },
            WAKEUP => Command::Wakeup,
            RESET => Command::Reset,
            other => panic!("no sample for kind {other:?}"),
        }
    }

    #[test]
    fn round_trip_every_kind() {
        for kind in KINDS {
            let cmd = sample(kind);
            let raw = cmd.encode().unwrap();
            assert_eq!(Command::decode(&raw).unwrap(), cmd, "kind {kind}");
        }
    }

    #[test]
    fn arity_mismatch_is_rejected_for_every_kind() {
        for kind in KINDS {
            if let Arity::Exactly(_) = arity_of(kind).unwrap() {
                let (_, mut args) = sample(kind).to_parts();
                args.push(Value::from(99u64));
                let err = Command::from_parts(kind, args).unwrap_err();
                assert!(
                    matches!(err, ProtocolError::Arity { .. }),
                    "kind {kind}: {err}"
                );
            }
        }
        for kind in [RELAY_INIT, RELAY_SET, RELAY_RESET] {
            let err = Command::from_parts(kind, Vec::new()).unwrap_err();
            assert!(matches!(err, ProtocolError::Arity { .. }), "kind {kind}");
        }
    }

    #[test]
    fn empty_cycle_pin_list_is_an_arity_error() {
        let raw = br#"["relay-cycle",[[],"exclusive"]]"#;
        let err = Command::decode(raw).unwrap_err();
        assert!(matches!(err, ProtocolError::Arity { .. }), "{err}");
    }

    #[test]
    fn unknown_kind() {
        let err = Command::decode(br#"["warp-drive",[]]"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownKind(k) if k == "warp-drive"));
    }

    #[test]
    fn malformed_payload() {
        for raw in [&b"\x00\x01\x02"[..], b"{}", b"[\"move\"]", b""] {
            let err = Command::decode(raw).unwrap_err();
            assert!(matches!(err, ProtocolError::Decode(_)), "{raw:?}");
        }
    }

    #[test]
    fn move_angle_out_of_range() {
        let err = Command::decode(br#"["move",[181]]"#).unwrap_err();
        assert!(matches!(err, ProtocolError::BadArgument { .. }));
        let err = Command::decode(br#"["move",[-1]]"#).unwrap_err();
        assert!(matches!(err, ProtocolError::BadArgument { .. }));
    }

    #[test]
    fn pin_descriptors_travel_as_pairs() {
        let cmd = Command::decode(br#"["relay-set",[[4,false],[17,true]]]"#).unwrap();
        assert_eq!(
            cmd,
            Command::RelaySet(vec![
                PinDescriptor {
                    pin: 4,
                    inverted: false
                },
                PinDescriptor {
                    pin: 17,
                    inverted: true
                },
            ])
        );
    }

    #[test]
    fn cycle_mode_parses_both_modes_only() {
        let ok = Command::decode(br#"["relay-cycle",[[[4,false]],"inclusive"]]"#).unwrap();
        assert!(matches!(
            ok,
            Command::RelayCycle {
                mode: CycleMode::Inclusive,
                ..
            }
        ));
        let err = Command::decode(br#"["relay-cycle",[[[4,false]],"sideways"]]"#).unwrap_err();
        assert!(matches!(err, ProtocolError::BadArgument { .. }));
    }

    #[test]
    fn arity_table_covers_every_kind() {
        for kind in KINDS {
            assert!(arity_of(kind).is_some(), "kind {kind} missing from table");
        }
        assert!(arity_of("bogus").is_none());
    }
}
