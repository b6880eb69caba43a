// Maps each decoded request onto exactly one controller operation. Requests
// are fire-and-forget: nothing here replies, and a bad frame only ever costs
// itself, never the loop.

use tracing::{debug, error, info, warn};

use rusttune_core::Command;

use crate::hw::HwError;
use crate::relays::RelayBank;
use crate::servo::{ServoCommand, ServoHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Tear down and rebuild the transport and controllers in place.
    Reset,
}

pub struct CommandRouter {
    tx_servo: ServoHandle,
    ant_servo: ServoHandle,
    relays: RelayBank,
}

impl CommandRouter {
    pub fn new(tx_servo: ServoHandle, ant_servo: ServoHandle, relays: RelayBank) -> Self {
        Self {
            tx_servo,
            ant_servo,
            relays,
        }
    }

    /// Decode and dispatch one datagram. Undecodable, unknown and
    /// wrong-arity requests are logged and dropped.
    pub async fn handle(&mut self, raw: &[u8]) -> Option<Outcome> {
        let cmd = match Command::decode(raw) {
            Ok(cmd) => cmd,
            Err(e) => {
                warn!(error = %e, "dropping request");
                return None;
            }
        };
        self.dispatch(cmd).await
    }

    pub async fn dispatch(&mut self, cmd: Command) -> Option<Outcome> {
        debug!(kind = cmd.kind(), "dispatch");
        match cmd {
            Command::Home => self.tx_servo.post(ServoCommand::Home),
            Command::Move { angle } => self.tx_servo.post(ServoCommand::Move(angle)),
            Command::SetPwmRange { low, high } => self.tx_servo.set_pulse_range(low, high),
            Command::TestRange => self.tx_servo.test_range(),
            Command::AntHome => self.ant_servo.post(ServoCommand::Home),
            Command::AntMove { angle } => self.ant_servo.post(ServoCommand::Move(angle)),
            Command::AntSetPwmRange { low, high } => self.ant_servo.set_pulse_range(low, high),
            Command::AntTestRange => self.ant_servo.test_range(),
            Command::Settings(s) => {
                self.tx_servo.configure(s);
                self.ant_servo.configure(s);
            }
            Command::RelayInit(pins) => log_relay(self.relays.init_pins(&pins)),
            Command::RelaySet(pins) => log_relay(self.relays.set_pins(&pins)),
            Command::RelayReset(pins) => log_relay(self.relays.reset_pins(&pins)),
            Command::RelayCycle { pins, mode } => {
                log_relay(self.relays.cycle_pins(&pins, mode).await)
            }
            // A wakeup only exists to make the sender our peer.
            Command::Wakeup => debug!("panel wakeup"),
            Command::Reset => {
                info!("reset requested");
                return Some(Outcome::Reset);
            }
        }
        None
    }

    /// Release the relay pins and stop both servo loops.
    pub async fn shutdown(mut self) {
        self.relays.close();
        self.tx_servo.shutdown().await;
        self.ant_servo.shutdown().await;
    }
}

fn log_relay(result: Result<(), HwError>) {
    if let Err(e) = result {
        error!(error = %e, "relay operation failed");
    }
}
