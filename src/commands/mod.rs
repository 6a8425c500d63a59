pub mod analytics;
pub mod connection;
pub mod estimates;
pub mod settings;
pub mod sync;
