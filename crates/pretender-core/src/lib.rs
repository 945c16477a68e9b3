//! Core types, configuration, and state management for Pretender.
//!
//! This crate provides the foundational building blocks shared across all
//! Pretender service implementations, including multi-account/multi-region
//! state management, configuration, and common AWS type definitions.

mod config;
mod error;
mod state;
mod types;

pub use config::PretenderCoreConfig;
pub use error::{PretenderCoreError, PretenderCoreResult};
pub use state::AccountRegionStore;
pub use types::{AccountId, AwsRegion};
