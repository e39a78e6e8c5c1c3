pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, SessionStorageMode};
pub use error::{FlowcoreError, Result};
pub use types::*;
