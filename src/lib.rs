//! with-env - run programs inside provisioned environments
//!
//! Provisions Python virtualenvs keyed by a fingerprint of their inputs,
//! caches them with a bounded least-recently-used store, and runs programs
//! inside them. Also runs programs against throwaway PostgreSQL databases.

pub mod cache;
pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod lifecycle;
pub mod process;
pub mod provision;

pub use error::{WithEnvError, WithEnvResult};
pub use lifecycle::{EnvSpec, LifecycleController, Strategy};
