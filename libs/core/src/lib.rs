pub mod config;
pub mod controller;
pub mod error;
pub mod operation;
pub mod telemetry;
pub mod token;
pub mod version;
