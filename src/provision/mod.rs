//! Environment provisioning
//!
//! Provisioners build an environment inside a directory by driving
//! external tools, and know how to make a built environment active.

mod virtualenv;

pub use virtualenv::VirtualenvProvisioner;

use crate::error::WithEnvResult;
use crate::process::EnvMap;
use async_trait::async_trait;
use std::path::Path;

/// Builds and activates environments
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Create a complete environment at `root`.
    ///
    /// May leave a partial tree behind on failure; the caller removes it.
    async fn provision(&self, root: &Path, base_env: &EnvMap) -> WithEnvResult<()>;

    /// Make the environment at `root` active in `env`
    fn activate(&self, root: &Path, env: &mut EnvMap) -> WithEnvResult<()>;
}
