pub mod common;
pub mod error;
pub mod futures;
mod loggers;
pub mod telemetry;
