pub mod arguments;
pub mod config;
pub mod errors; // Structured error handling
pub mod gateway;
pub mod logger;

#[cfg(feature = "web")]
pub mod webserver;
