// ── Artifact Store ───────────────────────────────────────────────────────
// Files under a single writable root, keyed by (category, path). Guards
// against upward path traversal and validates `.json`-suffixed content
// before commit.

use std::path::{Path, PathBuf};

use crate::error::{EngineError, EngineResult};

pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> EngineResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(ArtifactStore { root })
    }

    /// Resolves `category/path` under the root, rejecting any component
    /// that would escape it (`..`, absolute paths, empty components).
    fn resolve(&self, category: &str, path: &str) -> EngineResult<PathBuf> {
        let mut resolved = self.root.clone();
        for component in category.split('/').chain(path.split('/')) {
            if component.is_empty() || component == "." {
                continue;
            }
            if component == ".." || Path::new(component).is_absolute() {
                return Err(EngineError::contract(format!("invalid artifact path: {category}/{path}")));
            }
            resolved.push(component);
        }
        Ok(resolved)
    }

    pub fn write(&self, category: &str, path: &str, content: &[u8]) -> EngineResult<()> {
        if path.ends_with(".json") {
            serde_json::from_slice::<serde_json::Value>(content)
                .map_err(|e| EngineError::contract(format!("invalid_json: {e}")))?;
        }
        let resolved = self.resolve(category, path)?;
        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(resolved, content)?;
        Ok(())
    }

    pub fn read(&self, category: &str, path: &str) -> EngineResult<Vec<u8>> {
        let resolved = self.resolve(category, path)?;
        Ok(std::fs::read(resolved)?)
    }

    /// Canonical accessor taking a single slash-joined string, e.g.
    /// `"memory/logs/sub/f.json"`, splitting on the first segment as the
    /// category and the remainder as the path.
    pub fn read_by_path(&self, full_path: &str) -> EngineResult<Vec<u8>> {
        let (category, path) = full_path
            .split_once('/')
            .ok_or_else(|| EngineError::contract(format!("path must contain a category segment: {full_path}")))?;
        self.read(category, path)
    }

    pub fn canonical_path(&self, category: &str, path: &str) -> String {
        format!("{category}/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ArtifactStore {
        let dir = tempfile::tempdir().unwrap();
        ArtifactStore::new(dir.into_path()).unwrap()
    }

    #[test]
    fn rejects_non_json_content_for_json_path() {
        let store = store();
        let result = store.write("logs", "s.json", b"# not json");
        assert!(result.is_err());
    }

    #[test]
    fn accepts_and_reads_back_valid_json() {
        let store = store();
        store.write("logs", "s.json", br#"{"ok":true}"#).unwrap();
        let content = store.read("logs", "s.json").unwrap();
        assert_eq!(content, br#"{"ok":true}"#);
    }

    #[test]
    fn read_by_path_matches_category_path_read() {
        let store = store();
        store.write("memory", "logs/sub/f.json", br#"{"k":1}"#).unwrap();
        let content = store.read_by_path("memory/logs/sub/f.json").unwrap();
        assert_eq!(content, br#"{"k":1}"#);
    }

    #[test]
    fn rejects_upward_traversal() {
        let store = store();
        let result = store.write("logs", "../../etc/passwd", b"x");
        assert!(result.is_err());
    }
}
