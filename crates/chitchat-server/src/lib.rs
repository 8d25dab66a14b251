pub mod channel;
pub mod connection;
pub mod handlers;
pub mod http;
pub mod registry;
pub mod server;

pub use channel::RoomChannel;
pub use connection::{ConnectionPhase, LiveConnection};
pub use registry::ConnectionRegistry;
pub use server::{start, ServerConfig, ServerHandle};
