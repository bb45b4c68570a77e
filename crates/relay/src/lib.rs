//! The relay core: a render loop publishing (telemetry, frame) pairs into a
//! shared cell, and per-client WebSocket sessions that broadcast that cell and
//! dispatch inbound commands to the device.

pub mod config;
pub mod dispatch;
pub mod envelope;
pub mod registry;
pub mod render;
pub mod server;
pub mod session;
pub mod state;

pub use config::*;
pub use dispatch::{CommandDispatcher, DispatchError, Params};
pub use registry::{ClientId, Registration, SessionRegistry};
pub use render::RenderTask;
pub use server::ServerTask;
pub use session::RelayContext;
pub use state::{SharedState, StatePair, StateReader};
