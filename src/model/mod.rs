pub mod arg;
pub mod config;
pub mod message;
