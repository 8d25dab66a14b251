pub mod chatrooms;
pub mod database;
pub mod error;
pub mod gateway;
pub mod messages;
pub mod schema;
pub mod users;

pub use database::Database;
pub use error::StoreError;
pub use gateway::StoreGateway;
