//! Filesystem-backed include resolution for the preprocessor.

use std::path::{Path, PathBuf};

use wfx_effects::preprocessor::{IncludeHandler, ResolvedInclude};

/// Resolves includes relative to the including file, then the repo root.
pub struct FileIncludeHandler {
    root: PathBuf,
}

impl FileIncludeHandler {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileIncludeHandler { root: root.into() }
    }

    /// Handler rooted at the directory containing `repo_path`.
    pub fn for_repo(repo_path: &Path) -> Self {
        let root = repo_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        FileIncludeHandler::new(root)
    }
}

impl IncludeHandler for FileIncludeHandler {
    fn resolve(&mut self, path: &str, from: &str, _system: bool) -> std::io::Result<ResolvedInclude> {
        let mut candidates = Vec::with_capacity(3);

        if let Some(from_dir) = Path::new(from).parent() {
            candidates.push(from_dir.join(path));
        }
        candidates.push(self.root.join(path));
        candidates.push(PathBuf::from(path));

        for candidate in candidates {
            match std::fs::read_to_string(&candidate) {
                Ok(source) => {
                    return Ok(ResolvedInclude {
                        path: candidate.to_string_lossy().replace('\\', "/"),
                        source,
                    });
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err),
            }
        }

        Err(std::io::Error::from(std::io::ErrorKind::NotFound))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_relative_to_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("common.wfxh"), "float4 shared_fn();\n").unwrap();

        let mut handler = FileIncludeHandler::new(dir.path());
        let resolved = handler.resolve("common.wfxh", "main.wfx", false).unwrap();
        assert!(resolved.source.contains("shared_fn"));

        let err = handler.resolve("missing.wfxh", "main.wfx", false).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }
}
