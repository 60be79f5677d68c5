pub mod actuator;
pub mod classifier;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod features;
pub mod session_log;
pub mod transport;
pub mod types;
pub mod windower;
