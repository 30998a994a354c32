//! Acquisition of external sources. Git sources are fetched by spawning
//! `git`; local and builtin (`$laze/`) sources are copied. Targets that
//! already exist on disk are assumed valid and never purged.

use std::path::{Path, PathBuf};
use std::process::Command;

use indexmap::IndexMap;
use tracing::info;

use crate::error::{LazeError, Result};
use crate::project::schema::DownloadDecl;

pub const LAZE_DATA_PREFIX: &str = "$laze/";

#[derive(Debug, Clone, PartialEq)]
pub enum DownloadSource {
    Git { url: String, commit: Option<String> },
    Local(PathBuf),
}

impl From<&DownloadDecl> for DownloadSource {
    fn from(decl: &DownloadDecl) -> Self {
        match decl {
            DownloadDecl::Url(url) => DownloadSource::Git {
                url: url.clone(),
                commit: None,
            },
            DownloadDecl::Git { git } => DownloadSource::Git {
                url: git.url.clone(),
                commit: git.commit.clone(),
            },
        }
    }
}

/// Pending acquisitions, keyed by target folder. Adding the same target
/// twice keeps the latest source; fetching is idempotent.
#[derive(Debug, Default)]
pub struct DownloadQueue {
    queue: IndexMap<PathBuf, DownloadSource>,
}

impl DownloadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, target: PathBuf, source: DownloadSource) {
        self.queue.insert(target, source);
    }

    pub fn contains(&self, target: &Path) -> bool {
        self.queue.contains_key(target)
    }

    /// Fetch every queued source whose target folder does not exist yet.
    pub fn fetch_all(&self) -> Result<()> {
        for (target, source) in &self.queue {
            match source {
                DownloadSource::Git { url, commit } => {
                    if let Some(path) = url.strip_prefix(LAZE_DATA_PREFIX) {
                        copy_local(&laze_data_dir()?.join(path), target)?;
                    } else {
                        git_clone(url, commit.as_deref(), target)?;
                    }
                }
                DownloadSource::Local(path) => copy_local(path, target)?,
            }
        }
        Ok(())
    }
}

/// Resolve the builtin laze data folder referenced by `$laze/` imports.
fn laze_data_dir() -> Result<PathBuf> {
    std::env::var_os("LAZE_DATA")
        .map(PathBuf::from)
        .ok_or_else(|| {
            LazeError::DownloadError(
                "builtin laze data folder not available (set LAZE_DATA)".to_string(),
            )
        })
}

fn git_clone(url: &str, commit: Option<&str>, target: &Path) -> Result<()> {
    if target.join(".git").is_dir() {
        info!(
            "skip cloning \"{}\" to \"{}\", target already exists",
            url,
            target.display()
        );
        return Ok(());
    }

    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }

    info!("cloning \"{}\" to \"{}\"", url, target.display());
    let target_str = target.to_string_lossy();
    run_git(&["clone", url, target_str.as_ref()], url)?;

    if let Some(commit) = commit {
        run_git(&["-C", target_str.as_ref(), "checkout", commit], url)?;
    }
    Ok(())
}

fn run_git(args: &[&str], url: &str) -> Result<()> {
    let status = Command::new("git")
        .args(args)
        .status()
        .map_err(|e| LazeError::DownloadError(format!("failed to run git: {}", e)))?;
    if !status.success() {
        return Err(LazeError::DownloadError(format!(
            "git {} failed for \"{}\"",
            args.first().copied().unwrap_or_default(),
            url
        )));
    }
    Ok(())
}

fn copy_local(src: &Path, target: &Path) -> Result<()> {
    if target.exists() {
        info!(
            "skip copying \"{}\" to \"{}\", target already exists",
            src.display(),
            target.display()
        );
        return Ok(());
    }
    if !src.is_dir() {
        return Err(LazeError::DownloadError(format!(
            "local source not found: {}",
            src.display()
        )));
    }
    copy_dir(src, target)
}

fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&from, &to)?;
        } else {
            std::fs::copy(&from, &to)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_source_from_decl() {
        let decl: DownloadDecl = serde_yaml::from_str("https://example.com/x.git").unwrap();
        assert_eq!(
            DownloadSource::from(&decl),
            DownloadSource::Git {
                url: "https://example.com/x.git".to_string(),
                commit: None,
            }
        );
    }

    #[test]
    fn test_fetch_copies_local_folder() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        std::fs::create_dir_all(src.join("sub")).unwrap();
        std::fs::write(src.join("sub/file.txt"), "data").unwrap();

        let target = tmp.path().join("out");
        let mut queue = DownloadQueue::new();
        queue.add(target.clone(), DownloadSource::Local(src));
        queue.fetch_all().unwrap();
        assert_eq!(
            std::fs::read_to_string(target.join("sub/file.txt")).unwrap(),
            "data"
        );

        // Re-running never purges an existing target.
        queue.fetch_all().unwrap();
    }

    #[test]
    fn test_fetch_missing_local_source_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let mut queue = DownloadQueue::new();
        queue.add(
            tmp.path().join("out"),
            DownloadSource::Local(tmp.path().join("absent")),
        );
        assert!(queue.fetch_all().is_err());
    }
}
