//! Worker binary shipped inside the `sqlprobe` executable.
//!
//! Building with `--features embedded-worker` bakes a pre-built
//! `sqlprobe-worker` (from `worker/bin/` or the crate root) into the binary.
//! At run time it is unpacked once per version into the user cache dir.

use std::path::PathBuf;

use super::error::{WorkerError, WorkerResult};

#[cfg(feature = "embedded-worker")]
static WORKER_BYTES: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/sqlprobe-worker"));

/// Whether this build carries a worker binary.
pub fn is_embedded_available() -> bool {
    cfg!(feature = "embedded-worker")
}

/// Unpack the bundled worker and return its path. An unpacked copy of the
/// right size is reused as is.
#[cfg(feature = "embedded-worker")]
pub fn extract_worker() -> WorkerResult<PathBuf> {
    use std::fs;

    let dir = dirs::cache_dir()
        .map(|dir| dir.join("sqlprobe"))
        .ok_or_else(|| not_found("no user cache directory"))?;
    fs::create_dir_all(&dir).map_err(WorkerError::Spawn)?;

    let name = format!("sqlprobe-worker-{}", env!("CARGO_PKG_VERSION"));
    let target = dir.join(&name);
    let unpacked = fs::metadata(&target).map(|m| m.len() == WORKER_BYTES.len() as u64);
    if matches!(unpacked, Ok(true)) {
        return Ok(target);
    }

    // Concurrent runs each write their own file; the rename is atomic.
    let partial = dir.join(format!("{name}.{}.part", std::process::id()));
    fs::write(&partial, WORKER_BYTES).map_err(WorkerError::Spawn)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&partial, fs::Permissions::from_mode(0o755))
            .map_err(WorkerError::Spawn)?;
    }
    fs::rename(&partial, &target).map_err(WorkerError::Spawn)?;

    tracing::debug!(path = %target.display(), "unpacked bundled worker");
    Ok(target)
}

#[cfg(not(feature = "embedded-worker"))]
pub fn extract_worker() -> WorkerResult<PathBuf> {
    Err(not_found(
        "this build has no bundled worker; pass --worker or set worker.path",
    ))
}

fn not_found(message: &str) -> WorkerError {
    WorkerError::Spawn(std::io::Error::new(std::io::ErrorKind::NotFound, message))
}
