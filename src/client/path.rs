use crate::{error::ClientResult, transport::FileSubsystem};

/// Returns `true` if `path` starts at the root
#[must_use]
pub fn is_absolute(path: &str) -> bool {
    path.starts_with('/')
}

/// Resolves `path` against the remote working directory unless it is
/// already absolute. Absolute paths are returned untouched, without asking
/// the subsystem.
pub async fn resolve<S: FileSubsystem>(subsystem: &S, path: &str) -> ClientResult<String> {
    if is_absolute(path) {
        return Ok(path.to_owned());
    }

    let resolved = subsystem.realpath(path).await?;
    debug!("resolved {path:?} to {resolved:?}");
    Ok(resolved)
}
