pub mod config;
pub mod db;
pub mod error;
pub mod files;
pub mod telemetry;
pub mod workflows;
