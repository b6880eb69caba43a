// Hardware seams. A driver is either a real backend (PCA9685 servo board, GPIO
// relay header) or the simulation backend below, chosen at construction time;
// the controllers never know which they are talking to.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

#[derive(Debug, thiserror::Error)]
pub enum HwError {
    #[error("pin {0} is not claimed as an output")]
    UnclaimedPin(u8),
    #[error("hardware fault: {0}")]
    Fault(String),
}

/// One 180 degree positioner. Servos only seek at full speed; smooth motion is
/// synthesized above this interface by stepping the angle.
pub trait ServoDriver: Send {
    fn set_pulse_range(&mut self, low: u16, high: u16) -> Result<(), HwError>;
    fn set_angle(&mut self, angle: u8) -> Result<(), HwError>;
}

/// A bank of binary outputs driving relay coils.
pub trait PinDriver: Send {
    fn setup_output(&mut self, pin: u8) -> Result<(), HwError>;
    fn write(&mut self, pin: u8, level: Level) -> Result<(), HwError>;
    fn release(&mut self);
}

#[derive(Debug, Default)]
pub struct ServoJournal {
    pub pulse_ranges: Vec<(u16, u16)>,
    pub angles: Vec<u8>,
}

pub type SharedServoJournal = Arc<Mutex<ServoJournal>>;

/// Log-only servo backend; lets the identical control logic run without the
/// servo board attached.
pub struct SimServo {
    label: &'static str,
    journal: Option<SharedServoJournal>,
}

impl SimServo {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            journal: None,
        }
    }

    pub fn recording(label: &'static str) -> (Self, SharedServoJournal) {
        let journal = SharedServoJournal::default();
        (
            Self {
                label,
                journal: Some(journal.clone()),
            },
            journal,
        )
    }
}

impl ServoDriver for SimServo {
    fn set_pulse_range(&mut self, low: u16, high: u16) -> Result<(), HwError> {
        info!(servo = self.label, low, high, "sim: pulse range");
        if let Some(j) = &self.journal {
            lock(j).pulse_ranges.push((low, high));
        }
        Ok(())
    }

    fn set_angle(&mut self, angle: u8) -> Result<(), HwError> {
        debug!(servo = self.label, angle, "sim: angle");
        if let Some(j) = &self.journal {
            lock(j).angles.push(angle);
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct PinJournal {
    pub setups: Vec<u8>,
    pub writes: Vec<(u8, Level)>,
    pub released: usize,
}

pub type SharedPinJournal = Arc<Mutex<PinJournal>>;

/// Log-only relay backend. Tracks claimed pins so a write to an unclaimed pin
/// fails the same way real GPIO would.
pub struct SimPins {
    claimed: BTreeSet<u8>,
    journal: Option<SharedPinJournal>,
}

impl SimPins {
    pub fn new() -> Self {
        Self {
            claimed: BTreeSet::new(),
            journal: None,
        }
    }

    pub fn with_journal(journal: SharedPinJournal) -> Self {
        Self {
            claimed: BTreeSet::new(),
            journal: Some(journal),
        }
    }

    pub fn recording() -> (Self, SharedPinJournal) {
        let journal = SharedPinJournal::default();
        (Self::with_journal(journal.clone()), journal)
    }
}

impl Default for SimPins {
    fn default() -> Self {
        Self::new()
    }
}

impl PinDriver for SimPins {
    fn setup_output(&mut self, pin: u8) -> Result<(), HwError> {
        info!(pin, "sim: claim output");
        self.claimed.insert(pin);
        if let Some(j) = &self.journal {
            lock(j).setups.push(pin);
        }
        Ok(())
    }

    fn write(&mut self, pin: u8, level: Level) -> Result<(), HwError> {
        if !self.claimed.contains(&pin) {
            return Err(HwError::UnclaimedPin(pin));
        }
        debug!(pin, ?level, "sim: write");
        if let Some(j) = &self.journal {
            lock(j).writes.push((pin, level));
        }
        Ok(())
    }

    fn release(&mut self) {
        info!(pins = self.claimed.len(), "sim: release");
        self.claimed.clear();
        if let Some(j) = &self.journal {
            lock(j).released += 1;
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
