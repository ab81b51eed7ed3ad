//! Repository checkout into a service's data directory.

use std::path::Path;

use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{ProvisionError, ProvisionResult};

/// `git clone <url> <dest>`. `dest` must be absent or empty.
///
/// A non-zero exit fails with the tool's stderr as the message.
pub async fn clone_repo(url: &str, dest: &Path) -> ProvisionResult<()> {
    debug!(url, ?dest, "cloning repository");
    let output = Command::new("git")
        .arg("clone")
        .arg("--")
        .arg(url)
        .arg(dest)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .await
        .map_err(|e| ProvisionError::CloneFailed(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(ProvisionError::CloneFailed(stderr));
    }

    info!(url, ?dest, "repository cloned");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_repository_fails_with_diagnostic() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("data");
        let source = tmp.path().join("no-such-repo");

        let err = clone_repo(source.to_str().unwrap(), &dest).await.unwrap_err();
        match err {
            ProvisionError::CloneFailed(message) => assert!(!message.is_empty()),
            other => panic!("expected CloneFailed, got {other:?}"),
        }
    }
}
