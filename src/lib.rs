pub mod audit;
pub mod calibration;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod handlers;
pub mod router;
pub mod service;
pub mod types;

pub use error::LabGuardError;
