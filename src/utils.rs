use chrono::{DateTime, Utc};
use std::time::SystemTime;

pub fn unix(time: SystemTime) -> u32 {
    u32::try_from(DateTime::<Utc>::from(time).timestamp()).unwrap_or(0)
}

/// Joins a directory and an entry name without doubling the separator
pub fn join(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Splits a path into parent directory and final component
pub fn split(path: &str) -> (&str, &str) {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => ("/", &trimmed[1..]),
        Some(idx) => (&trimmed[..idx], &trimmed[idx + 1..]),
        None => ("", trimmed),
    }
}
