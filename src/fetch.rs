//! Materialize a repository as a local working tree.
//!
//! Remote locators are cloned with the system `git` into a private temporary
//! directory that is deleted when the [`WorkingTree`] is dropped or
//! released, unless `fetch.retain` is set. An existing local directory is
//! used in place and never deleted.
//!
//! Workflow for remote locators:
//! 1. Create a `repo-ingest-*` temporary directory.
//! 2. Clone: shallow and single-branch by default, full when history is
//!    needed for blame or the reference is a commit hash.
//! 3. Check out the commit when the reference is a hash.
//! 4. Resolve `HEAD` and the `origin` URL.
//!
//! The whole remote fetch runs under `fetch.timeout_secs`; the git child
//! process is killed when the timeout fires.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tokio::process::Command;

use crate::config::FetchConfig;
use crate::error::FetchError;
use crate::models::IngestionJob;

const REMOTE_PREFIXES: &[&str] = &["https://", "http://", "ssh://", "git@", "file://"];

/// A materialized repository, exclusively owned for the run.
#[derive(Debug)]
pub struct WorkingTree {
    root: PathBuf,
    reference: String,
    repository_url: String,
    has_history: bool,
    guard: TreeGuard,
}

#[derive(Debug)]
enum TreeGuard {
    /// Deleted on drop.
    Owned(TempDir),
    /// Cloned, but kept after the run.
    Retained,
    /// A caller's directory, used in place.
    Borrowed,
}

impl WorkingTree {
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Commit hash of the materialized tree, or `working-tree` for a local
    /// directory that is not a git checkout.
    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn repository_url(&self) -> &str {
        &self.repository_url
    }

    /// Whether `git blame` can be run against this tree.
    pub fn has_history(&self) -> bool {
        self.has_history
    }

    pub fn is_retained(&self) -> bool {
        matches!(self.guard, TreeGuard::Retained)
    }

    /// Delete the tree now if it is owned, reporting cleanup errors.
    pub fn release(self) -> std::io::Result<()> {
        match self.guard {
            TreeGuard::Owned(dir) => dir.close(),
            TreeGuard::Retained => {
                tracing::info!(path = %self.root.display(), "retaining working tree");
                Ok(())
            }
            TreeGuard::Borrowed => Ok(()),
        }
    }
}

/// Produce a [`WorkingTree`] for the job's source and reference.
pub async fn fetch(job: &IngestionJob, config: &FetchConfig) -> Result<WorkingTree, FetchError> {
    let source = job.source.trim();
    if is_remote(source) {
        let timeout = config.timeout();
        return tokio::time::timeout(timeout, clone_remote(source, job, config))
            .await
            .map_err(|_| FetchError::Timeout {
                locator: source.to_string(),
                timeout,
            })?;
    }

    let path = Path::new(source);
    if !path.is_dir() {
        return Err(FetchError::InvalidLocator(source.to_string()));
    }
    open_local(path).await
}

fn is_remote(locator: &str) -> bool {
    REMOTE_PREFIXES.iter().any(|p| locator.starts_with(p))
}

/// 7 to 40 hex digits.
fn is_commit_hash(reference: &str) -> bool {
    (7..=40).contains(&reference.len()) && reference.chars().all(|c| c.is_ascii_hexdigit())
}

async fn clone_remote(
    locator: &str,
    job: &IngestionJob,
    config: &FetchConfig,
) -> Result<WorkingTree, FetchError> {
    let tmp = tempfile::Builder::new().prefix("repo-ingest-").tempdir()?;
    let dest = tmp.path().to_path_buf();
    let by_hash = is_commit_hash(&job.reference);
    let shallow = config.shallow && !job.extract_history && !by_hash;

    tracing::info!(
        locator,
        reference = %job.reference,
        shallow,
        "cloning repository"
    );

    let mut args: Vec<String> = vec!["clone".into()];
    if by_hash {
        args.push("--no-checkout".into());
    } else {
        args.extend(["--branch".into(), job.reference.clone(), "--single-branch".into()]);
        if shallow {
            args.extend(["--depth".into(), "1".into()]);
        }
    }
    args.push(locator.to_string());
    args.push(dest.to_string_lossy().to_string());

    run_git(&args, None)
        .await
        .map_err(|e| classify_failure(e, locator, &job.reference))?;

    if by_hash {
        let checkout = ["checkout".to_string(), "--detach".into(), job.reference.clone()];
        run_git(&checkout, Some(&dest))
            .await
            .map_err(|e| match e {
                FetchError::Git { .. } => FetchError::ReferenceNotFound {
                    locator: locator.to_string(),
                    reference: job.reference.clone(),
                },
                other => other,
            })?;
    }

    let reference = head_sha(&dest).await?;
    let repository_url = origin_url(&dest)
        .await
        .unwrap_or_else(|| locator.to_string());

    let guard = if config.retain {
        let _ = tmp.keep();
        TreeGuard::Retained
    } else {
        TreeGuard::Owned(tmp)
    };

    Ok(WorkingTree {
        root: dest,
        reference,
        repository_url,
        has_history: true,
        guard,
    })
}

async fn open_local(path: &Path) -> Result<WorkingTree, FetchError> {
    let root = path.canonicalize()?;
    let head = head_sha(&root).await.ok();
    let has_history = head.is_some();
    let repository_url = match origin_url(&root).await {
        Some(url) => url,
        None => root.display().to_string(),
    };
    tracing::info!(path = %root.display(), has_history, "using local directory in place");

    Ok(WorkingTree {
        root,
        reference: head.unwrap_or_else(|| "working-tree".to_string()),
        repository_url,
        has_history,
        guard: TreeGuard::Borrowed,
    })
}

async fn head_sha(repo_dir: &Path) -> Result<String, FetchError> {
    let args = ["rev-parse".to_string(), "HEAD".into()];
    run_git(&args, Some(repo_dir)).await
}

async fn origin_url(repo_dir: &Path) -> Option<String> {
    let args = [
        "config".to_string(),
        "--get".into(),
        "remote.origin.url".into(),
    ];
    run_git(&args, Some(repo_dir))
        .await
        .ok()
        .filter(|url| !url.is_empty())
}

/// Run git and return trimmed stdout.
async fn run_git(args: &[String], cwd: Option<&Path>) -> Result<String, FetchError> {
    let mut cmd = Command::new("git");
    cmd.args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let output = cmd.output().await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            FetchError::GitUnavailable(e)
        } else {
            FetchError::Io(e)
        }
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(FetchError::Git {
            command: args.first().cloned().unwrap_or_default(),
            stderr: stderr.trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Map a failed clone onto the fetch error taxonomy by its stderr.
fn classify_failure(err: FetchError, locator: &str, reference: &str) -> FetchError {
    let FetchError::Git { stderr, .. } = &err else {
        return err;
    };
    let lower = stderr.to_lowercase();

    if lower.contains("no space left on device") {
        return FetchError::DiskFull(locator.to_string());
    }
    if lower.contains("remote branch")
        || lower.contains("couldn't find remote ref")
        || lower.contains("did not match any")
    {
        return FetchError::ReferenceNotFound {
            locator: locator.to_string(),
            reference: reference.to_string(),
        };
    }
    if lower.contains("could not resolve host")
        || lower.contains("repository not found")
        || lower.contains("does not appear to be a git repository")
        || lower.contains("could not read from remote")
        || lower.contains("unable to access")
        || lower.contains("does not exist")
        || lower.contains("connection refused")
    {
        return FetchError::Unreachable {
            locator: locator.to_string(),
            detail: stderr.clone(),
        };
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    fn git_err(stderr: &str) -> FetchError {
        FetchError::Git {
            command: "clone".into(),
            stderr: stderr.into(),
        }
    }

    #[test]
    fn remote_locator_forms() {
        assert!(is_remote("https://github.com/org/repo.git"));
        assert!(is_remote("git@github.com:org/repo.git"));
        assert!(is_remote("ssh://git@host/repo"));
        assert!(is_remote("file:///tmp/repo"));
        assert!(!is_remote("ftp://host/repo"));
        assert!(!is_remote("./local"));
    }

    #[test]
    fn commit_hash_detection() {
        assert!(is_commit_hash("a1b2c3d"));
        assert!(is_commit_hash("0123456789abcdef0123456789abcdef01234567"));
        assert!(!is_commit_hash("main"));
        assert!(!is_commit_hash("abc"));
        assert!(!is_commit_hash("release-1.0"));
    }

    #[test]
    fn classifies_clone_failures() {
        let missing_branch =
            classify_failure(git_err("warning: Remote branch nope not found in upstream origin"), "u", "nope");
        assert!(matches!(missing_branch, FetchError::ReferenceNotFound { .. }));

        let disk = classify_failure(git_err("fatal: write error: No space left on device"), "u", "main");
        assert!(matches!(disk, FetchError::DiskFull(_)));

        let host = classify_failure(
            git_err("fatal: unable to access 'https://nope.invalid/': Could not resolve host"),
            "u",
            "main",
        );
        assert!(matches!(host, FetchError::Unreachable { .. }));

        let other = classify_failure(git_err("fatal: something odd"), "u", "main");
        assert!(matches!(other, FetchError::Git { .. }));
    }

    #[tokio::test]
    async fn rejects_unknown_locator() {
        let job = IngestionJob::new("ftp://example.com/repo");
        let err = fetch(&job, &FetchConfig::default()).await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidLocator(_)));
    }

    #[tokio::test]
    async fn local_directory_is_borrowed() {
        let tmp = TempDir::new().unwrap();
        let job = IngestionJob::new(tmp.path().to_string_lossy());
        let tree = fetch(&job, &FetchConfig::default()).await.unwrap();
        assert_eq!(tree.root(), tmp.path().canonicalize().unwrap());
        assert!(!tree.is_retained());
        tree.release().unwrap();
        assert!(tmp.path().exists());
    }
}
