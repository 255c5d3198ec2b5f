pub mod config;
pub mod errors;
pub mod inbox;
pub mod logging;
