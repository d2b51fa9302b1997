pub mod config;
pub mod deactivate;
pub mod error;
pub mod logging;
pub mod report;
pub mod runtime;
pub mod scan;
pub mod session;
pub mod tokens;
