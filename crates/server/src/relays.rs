// Owns the set of relay outputs currently configured for the matching network
// and switches them as a group. Group selection is all-off happens-before
// all-on: a short all-off window is observable, which is fine for slow relays
// but is no break-before-make guarantee.
//
// Not internally synchronized. The bank belongs to the dispatch task; anyone
// adding a second dispatch path has to bring their own locking.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use rusttune_core::{CycleMode, PinDescriptor};

use crate::hw::{HwError, Level, PinDriver};

pub struct RelayBank {
    driver: Box<dyn PinDriver>,
    /// pin -> inverted. BTreeMap keeps the all-off sweep order deterministic.
    configured: BTreeMap<u8, bool>,
    dwell: Duration,
}

impl RelayBank {
    pub fn new(driver: Box<dyn PinDriver>, dwell: Duration) -> Self {
        Self {
            driver,
            configured: BTreeMap::new(),
            dwell,
        }
    }

    /// Merge descriptors into the configured set. A pin is claimed as an
    /// output exactly once, on first sight; re-init only updates its active
    /// level, with the pin parked de-energized either way.
    pub fn init_pins(&mut self, pins: &[PinDescriptor]) -> Result<(), HwError> {
        for d in pins {
            match self.configured.entry(d.pin) {
                Entry::Vacant(entry) => {
                    self.driver.setup_output(d.pin)?;
                    self.driver.write(d.pin, drive_level(false, d.inverted))?;
                    entry.insert(d.inverted);
                }
                Entry::Occupied(mut entry) => {
                    self.driver.write(d.pin, drive_level(false, d.inverted))?;
                    entry.insert(d.inverted);
                }
            }
        }
        info!(configured = self.configured.len(), "relay pins configured");
        Ok(())
    }

    /// De-energize everything configured, then energize exactly `pins`.
    pub fn set_pins(&mut self, pins: &[PinDescriptor]) -> Result<(), HwError> {
        debug!(count = pins.len(), "select relay group");
        self.energize_exactly(pins)
    }

    /// Same electrical operation as `set_pins`; callers use it to select the
    /// alternate (low-range) group of the two-position model.
    pub fn reset_pins(&mut self, pins: &[PinDescriptor]) -> Result<(), HwError> {
        debug!(count = pins.len(), "select alternate relay group");
        self.energize_exactly(pins)
    }

    /// Diagnostic sweep for field-testing the wiring; not a production
    /// switching path. Exclusive mode walks the list one energized pin at a
    /// time then de-energizes in reverse; inclusive mode builds the set up
    /// cumulatively and leaves it energized for inspection.
    pub async fn cycle_pins(
        &mut self,
        pins: &[PinDescriptor],
        mode: CycleMode,
    ) -> Result<(), HwError> {
        let known: Vec<PinDescriptor> = pins
            .iter()
            .filter(|d| self.check_configured(d.pin))
            .copied()
            .collect();
        info!(count = known.len(), ?mode, "relay cycle");

        match mode {
            CycleMode::Exclusive => {
                self.all_off()?;
                let mut previous: Option<PinDescriptor> = None;
                for d in &known {
                    if let Some(p) = previous {
                        self.driver.write(p.pin, drive_level(false, p.inverted))?;
                    }
                    self.driver.write(d.pin, drive_level(true, d.inverted))?;
                    previous = Some(*d);
                    sleep(self.dwell).await;
                }
                for d in known.iter().rev() {
                    self.driver.write(d.pin, drive_level(false, d.inverted))?;
                    sleep(self.dwell).await;
                }
            }
            CycleMode::Inclusive => {
                self.all_off()?;
                for d in &known {
                    self.driver.write(d.pin, drive_level(true, d.inverted))?;
                    sleep(self.dwell).await;
                }
            }
        }
        Ok(())
    }

    /// Release the underlying pins. Must run before exit on any run that
    /// claimed pins, or the ownership leaks to the next process.
    pub fn close(&mut self) {
        self.driver.release();
        self.configured.clear();
        info!("relay bank closed");
    }

    pub fn configured_pins(&self) -> Vec<u8> {
        self.configured.keys().copied().collect()
    }

    fn energize_exactly(&mut self, pins: &[PinDescriptor]) -> Result<(), HwError> {
        self.all_off()?;
        for d in pins {
            if !self.check_configured(d.pin) {
                continue;
            }
            self.driver.write(d.pin, drive_level(true, d.inverted))?;
        }
        Ok(())
    }

    fn all_off(&mut self) -> Result<(), HwError> {
        for (&pin, &inverted) in &self.configured {
            self.driver.write(pin, drive_level(false, inverted))?;
        }
        Ok(())
    }

    // Energizing a pin nobody configured would assert an unclaimed output.
    fn check_configured(&self, pin: u8) -> bool {
        let known = self.configured.contains_key(&pin);
        if !known {
            warn!(pin, "ignoring unconfigured relay pin");
        }
        known
    }
}

fn drive_level(energized: bool, inverted: bool) -> Level {
    if energized != inverted {
        Level::High
    } else {
        Level::Low
    }
}
