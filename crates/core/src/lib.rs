pub mod commands;
pub mod events;

pub use commands::{Arity, Command, CycleMode, MotionSettings, PinDescriptor, ProtocolError};
pub use events::Event;
