//! Host environment functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::path::PathBuf;
use thiserror::Error;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Environment variable pointing at the software root directory.
///
/// The root contains the `params` and `sessions` directories.
pub const SW_ROOT_ENV_VAR: &str = "CTRL_SW_ROOT";

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors associated with resolving the software root.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Neither {} nor the current directory could be resolved", SW_ROOT_ENV_VAR)]
    NoRoot(std::io::Error),
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Get the software root directory.
///
/// If the `CTRL_SW_ROOT` environment variable is set it is used as the root,
/// otherwise the current working directory is used. This allows the
/// executables to be run both from an installed location and straight out of
/// the repository.
pub fn get_sw_root() -> Result<PathBuf, HostError> {
    match std::env::var(SW_ROOT_ENV_VAR) {
        Ok(root) => Ok(PathBuf::from(root)),
        Err(_) => std::env::current_dir().map_err(HostError::NoRoot),
    }
}
