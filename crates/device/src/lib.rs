pub mod command;
pub mod config;
pub mod driver;
mod error;
mod session;
mod task;

pub use command::*;
pub use config::*;
pub use driver::{DeviceDriver, DeviceInfo, MoveCommand, SimulatedDriver, TelloDriver, FLIGHT_MODES};
pub use error::DeviceError;
pub use session::DeviceSession;
pub use task::*;
