pub mod config;
pub mod hw;
pub mod relays;
pub mod router;
pub mod run;
pub mod servo;

pub use config::Config;
pub use run::{run, Drivers};
