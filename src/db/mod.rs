pub mod connection;
pub mod queries;
pub mod schema;

pub use connection::*;
pub use queries::RecordStore;
pub use schema::*;
