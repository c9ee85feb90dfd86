pub mod coordinator;
pub mod models;
pub mod store;
pub mod vision;
