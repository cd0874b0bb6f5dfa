// Re-export needed modules for testing
pub mod alerts;
pub mod api;
pub mod chat; // Websocket sync engine
pub mod config;
pub mod error;
pub mod models;

// Re-export main types for convenience
pub use chat::ChatClient;
pub use error::ChatError;
pub use models::*;
