pub mod config;
pub mod error;
pub mod fetch;
pub mod frame;
pub mod logging;
pub mod mta;
pub mod output;
pub mod retry;
pub mod stats;
pub mod weather;
