//! Persisted reliability profiles with integrity digests.
//!
//! Layout: `<dir>/<task_id>/profile.json` plus `profile.digest` holding the
//! SHA-256 of the JSON bytes. Reads verify the digest before parsing.

use std::path::{Path, PathBuf};

use crate::domain::{ContentDigest, EvalError, EvalResult, ReliabilityProfile};

const PROFILE_FILE: &str = "profile.json";
const DIGEST_FILE: &str = "profile.digest";

/// Directory name for a task id; path separators and other unsafe
/// characters become `_`.
fn task_dir(dir: &Path, task_id: &str) -> PathBuf {
    let safe: String = task_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let safe = if safe.is_empty() || safe.chars().all(|c| c == '.') {
        format!("task_{safe}")
    } else {
        safe
    };
    dir.join(safe)
}

/// Write `profile` and its digest. Returns the path of the JSON file.
pub fn write_profile_artifact(profile: &ReliabilityProfile, dir: &Path) -> EvalResult<PathBuf> {
    let task_dir = task_dir(dir, &profile.task_id);
    std::fs::create_dir_all(&task_dir)?;

    let json = serde_json::to_vec_pretty(profile)?;
    let digest = ContentDigest::from_bytes(&json);
    let artifact_path = task_dir.join(PROFILE_FILE);
    std::fs::write(&artifact_path, &json)?;
    std::fs::write(task_dir.join(DIGEST_FILE), digest.as_str().as_bytes())?;

    tracing::debug!(
        task_id = %profile.task_id,
        digest = %digest.short(),
        path = %artifact_path.display(),
        "profile artifact written"
    );
    Ok(artifact_path)
}

/// Read the profile for `task_id`, failing with `DigestMismatch` if the
/// JSON no longer matches its recorded digest.
pub fn read_profile_artifact(task_id: &str, dir: &Path) -> EvalResult<ReliabilityProfile> {
    let task_dir = task_dir(dir, task_id);
    let json = std::fs::read(task_dir.join(PROFILE_FILE))?;
    let expected = std::fs::read_to_string(task_dir.join(DIGEST_FILE))?;
    let expected = expected.trim();
    let actual = ContentDigest::from_bytes(&json);
    if actual.as_str() != expected {
        return Err(EvalError::DigestMismatch {
            expected: expected.to_string(),
            actual: actual.as_str().to_string(),
        });
    }
    Ok(serde_json::from_slice(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_dir_sanitises() {
        let base = Path::new("/tmp/x");
        assert_eq!(task_dir(base, "a/b"), base.join("a_b"));
        assert_eq!(task_dir(base, ".."), base.join("task_.."));
        assert_eq!(task_dir(base, "ok-1.2"), base.join("ok-1.2"));
    }
}
