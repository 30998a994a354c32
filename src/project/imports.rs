//! Deferred `import:` resolution. Imports collected during a load pass are
//! normalized, materialized into `.laze/imports/<name>/<version|latest>`,
//! and their project files loaded like any other document.

use std::path::{Path, PathBuf};

use crate::download::{DownloadQueue, DownloadSource, LAZE_DATA_PREFIX};
use crate::error::Result;
use crate::project::schema::{ImportDecl, ImportSpec};

pub const IMPORTS_DIR: &str = ".laze/imports";

#[derive(Debug, Clone)]
pub struct ResolvedImport {
    pub name: String,
    /// Folder containing the import's project file.
    pub folder: PathBuf,
    pub importer: PathBuf,
}

/// Normalize and queue one load pass's imports; returns the folders (relative
/// to `root`) to load from once the queue has been fetched. The caller
/// fetches the queue.
pub fn resolve(
    root: &Path,
    imports: Vec<(PathBuf, ImportDecl)>,
    dl: &mut DownloadQueue,
) -> Result<Vec<ResolvedImport>> {
    let mut resolved = Vec::new();

    for (importer, decl) in imports {
        match decl {
            ImportDecl::Name(name) => {
                let (name, url) = name_to_source(&name);
                resolved.push(queue_one(
                    root,
                    dl,
                    &importer,
                    &name,
                    &url,
                    &ImportSpec::default(),
                ));
            }
            ImportDecl::Detailed(map) => {
                for (name, spec) in map {
                    let url = spec
                        .url
                        .clone()
                        .unwrap_or_else(|| format!("{}{}", LAZE_DATA_PREFIX, name));
                    resolved.push(queue_one(root, dl, &importer, &name, &url, &spec));
                }
            }
        }
    }

    Ok(resolved)
}

/// A bare import string is a git URL when it looks like one; otherwise it
/// names an entry of the builtin laze data folder.
fn name_to_source(name: &str) -> (String, String) {
    if name.contains("://") || name.ends_with(".git") {
        let base = name
            .rsplit('/')
            .next()
            .unwrap_or(name)
            .trim_end_matches(".git")
            .to_string();
        (base, name.to_string())
    } else {
        (name.to_string(), format!("{}{}", LAZE_DATA_PREFIX, name))
    }
}

fn queue_one(
    root: &Path,
    dl: &mut DownloadQueue,
    importer: &Path,
    name: &str,
    url: &str,
    spec: &ImportSpec,
) -> ResolvedImport {
    let folder = if let Some(folder) = &spec.folder_override {
        PathBuf::from(folder)
    } else {
        let version = spec.version.as_deref().unwrap_or("latest");
        let target = Path::new(IMPORTS_DIR).join(name).join(version);
        dl.add(
            root.join(&target),
            DownloadSource::Git {
                url: url.to_string(),
                commit: spec.version.clone(),
            },
        );
        target
    };

    let folder = match &spec.subdir {
        Some(subdir) => folder.join(subdir),
        None => folder,
    };

    ResolvedImport {
        name: name.to_string(),
        folder,
        importer: importer.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_url_import() {
        let (name, url) = name_to_source("https://example.com/proj/pkgs.git");
        assert_eq!(name, "pkgs");
        assert_eq!(url, "https://example.com/proj/pkgs.git");
    }

    #[test]
    fn test_unqualified_name_uses_laze_data() {
        let (name, url) = name_to_source("defaults");
        assert_eq!(name, "defaults");
        assert_eq!(url, "$laze/defaults");
    }

    #[test]
    fn test_detailed_import_folder_layout() {
        let decl: ImportDecl = serde_yaml::from_str(
            "pkg:\n  url: https://example.com/pkg.git\n  version: v1\n  subdir: sub",
        )
        .unwrap();
        let mut dl = DownloadQueue::new();
        let resolved = resolve(
            Path::new("/project"),
            vec![(PathBuf::from("laze.yml"), decl)],
            &mut dl,
        )
        .unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(
            resolved[0].folder,
            Path::new(".laze/imports/pkg/v1/sub").to_path_buf()
        );
    }

    #[test]
    fn test_folder_override_skips_acquisition() {
        let decl: ImportDecl =
            serde_yaml::from_str("pkg:\n  folder_override: vendor/pkg").unwrap();
        let mut dl = DownloadQueue::new();
        let resolved = resolve(
            Path::new("/project"),
            vec![(PathBuf::from("laze.yml"), decl)],
            &mut dl,
        )
        .unwrap();
        assert_eq!(resolved[0].folder, Path::new("vendor/pkg").to_path_buf());
    }
}
