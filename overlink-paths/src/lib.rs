//! Runtime path utilities for the overlink companion service.
//!
//! Single place that decides where the local event socket and the
//! event hub configuration live.
//!
//! # Platform Behavior
//!
//! | Platform | Data Directory | Socket Directory |
//! |----------|----------------|------------------|
//! | Linux    | `~/.local/share/overlink` | `$XDG_RUNTIME_DIR` or data dir |
//! | macOS    | `~/Library/Application Support/overlink` | Same as data dir |
//! | Windows  | `%APPDATA%/overlink` | Same as data dir |

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;

/// Errors specific to path operations.
#[derive(Error, Debug)]
pub enum PathError {
    #[error("Could not determine data directory")]
    NoDataDirectory,

    #[error("Could not determine config directory")]
    NoConfigDirectory,

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),
}

/// Application identifier used in path construction.
const APP_NAME: &str = "overlink";

/// Socket file name for the console event stream.
const EVENT_SOCKET_NAME: &str = "overlink_events.sock";

/// Configuration file name for the event hub.
const EVENT_CONFIG_NAME: &str = "events.toml";

/// Create `dir` (and parents) if missing, owner-only on Unix.
///
/// # Errors
/// Returns an error if the path exists but is not a directory, or if it
/// cannot be created.
pub fn ensure_private_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        if !dir.is_dir() {
            return Err(PathError::NotADirectory(dir.to_path_buf()).into());
        }
        return Ok(());
    }

    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = fs::Permissions::from_mode(0o700);
        fs::set_permissions(dir, perms)
            .with_context(|| format!("Failed to set permissions on {}", dir.display()))?;
    }

    Ok(())
}

/// Get the application data directory, creating it if needed.
///
/// # Errors
/// Returns an error if the directory cannot be determined or created.
pub fn get_data_dir() -> Result<PathBuf> {
    let base_dir = dirs::data_dir().ok_or(PathError::NoDataDirectory)?;
    let data_dir = base_dir.join(APP_NAME);
    ensure_private_dir(&data_dir)?;
    Ok(data_dir)
}

/// Get the directory that holds local sockets.
///
/// On Linux this is `$XDG_RUNTIME_DIR` when it exists; everywhere else it
/// falls back to the data directory.
///
/// # Errors
/// Returns an error if the directory cannot be determined or created.
pub fn get_socket_dir() -> Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        if let Some(runtime_dir) = dirs::runtime_dir() {
            if runtime_dir.is_dir() {
                return Ok(runtime_dir);
            }
        }
    }

    get_data_dir()
}

/// Path of the Unix socket consoles connect to for live events.
///
/// # Errors
/// Returns an error if the socket directory cannot be determined.
pub fn get_event_socket_path() -> Result<PathBuf> {
    Ok(get_socket_dir()?.join(EVENT_SOCKET_NAME))
}

/// Path of the event hub configuration file. Neither the file nor its
/// directory is created; the configuration is only ever read.
///
/// # Errors
/// Returns an error if the config directory cannot be determined.
pub fn get_event_config_path() -> Result<PathBuf> {
    let config_base = dirs::config_dir().ok_or(PathError::NoConfigDirectory)?;
    Ok(config_base.join(APP_NAME).join(EVENT_CONFIG_NAME))
}

/// Restrict a socket file to its owner (0o600). No-op if the file is gone.
#[cfg(unix)]
pub fn secure_socket_permissions(socket_path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if socket_path.exists() {
        let perms = fs::Permissions::from_mode(0o600);
        fs::set_permissions(socket_path, perms).with_context(|| {
            format!(
                "Failed to set socket permissions: {}",
                socket_path.display()
            )
        })?;
    }

    Ok(())
}

#[cfg(not(unix))]
pub fn secure_socket_permissions(_socket_path: &Path) -> Result<()> {
    Ok(())
}
