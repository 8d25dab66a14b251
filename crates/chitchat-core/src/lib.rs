pub mod errors;
pub mod gateway;
pub mod ids;
pub mod models;

pub use errors::ApiError;
pub use gateway::MessagePersistenceGateway;
pub use models::{Message, MESSAGE_MAX_LENGTH};
