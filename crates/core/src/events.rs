// Event wire format: a JSON `[tag, value]` pair sent from the remote unit to the
// panel's event port. `["heartbeat",[]]`, `["tx",45]`, `["ant",45]`.

use serde_json::Value;

use crate::commands::ProtocolError;

pub const HEARTBEAT: &str = "heartbeat";
pub const TX_PROGRESS: &str = "tx";
pub const ANT_PROGRESS: &str = "ant";

/// Asynchronous notice from the remote unit. There is no request/response
/// pairing; the panel correlates these with whatever it last asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Liveness beacon; absence is how the panel detects an offline unit.
    Heartbeat,
    /// TX capacitor servo passed through this angle.
    TxProgress(u8),
    /// Antenna capacitor servo passed through this angle.
    AntProgress(u8),
}

impl Event {
    pub fn tag(&self) -> &'static str {
        match self {
            Event::Heartbeat => HEARTBEAT,
            Event::TxProgress(_) => TX_PROGRESS,
            Event::AntProgress(_) => ANT_PROGRESS,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let value = match self {
            Event::Heartbeat => Value::Array(Vec::new()),
            Event::TxProgress(angle) | Event::AntProgress(angle) => {
                Value::from(u64::from(*angle))
            }
        };
        Ok(serde_json::to_vec(&(self.tag(), value))?)
    }

    pub fn decode(raw: &[u8]) -> Result<Self, ProtocolError> {
        let (tag, value): (String, Value) = serde_json::from_slice(raw)?;
        match tag.as_str() {
            HEARTBEAT => Ok(Event::Heartbeat),
            TX_PROGRESS => Ok(Event::TxProgress(angle(&tag, &value)?)),
            ANT_PROGRESS => Ok(Event::AntProgress(angle(&tag, &value)?)),
            _ => Err(ProtocolError::UnknownKind(tag)),
        }
    }
}

fn angle(tag: &str, value: &Value) -> Result<u8, ProtocolError> {
    value
        .as_u64()
        .filter(|n| *n <= 180)
        .map(|n| n as u8)
        .ok_or_else(|| ProtocolError::BadArgument {
            kind: tag.to_string(),
            reason: format!("expected an angle 0..=180, got {value}"),
        })
}
