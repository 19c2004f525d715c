//! Launcher Update Agent
//!
//! Headless client auto-update core for the game launcher: version
//! resolution, streaming patch download, archive validation, install
//! with backup snapshots, and manifest-based integrity repair.

pub mod archive;
pub mod config;
pub mod installer;
pub mod resolver;
pub mod state;
pub mod transfer;
pub mod updater;
pub mod utils;
pub mod verifier;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::UpdateError;
pub type Result<T> = std::result::Result<T, UpdateError>;
