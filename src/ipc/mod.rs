//! Control socket: line-delimited JSON requests over a Unix socket.

pub mod handler;
pub mod protocol;
pub mod server;

pub use handler::RegistryHandler;
pub use protocol::{ControlRequest, ControlResponse};
pub use server::{ControlHandler, IpcServer};
