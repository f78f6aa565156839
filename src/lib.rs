#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod pacing;
pub mod present;
pub mod reassemble;
pub mod render;
pub mod session;
pub mod transport;
