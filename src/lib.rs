pub mod checkpoint;
pub mod config;
pub mod errors;
pub mod logging;
pub mod phase;
pub mod protocol;
pub mod refund;
pub mod status;
pub mod store;
