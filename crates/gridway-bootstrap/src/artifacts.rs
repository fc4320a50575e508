//! Built-artifact discovery and digesting.
//!
//! Artifacts are wheels and source archives collected under the local
//! artifact directory. Digests let the transfer step skip files already
//! present on a host, which is what makes re-provisioning cheap.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

const ARTIFACT_EXTENSIONS: [&str; 3] = [".whl", ".tar.gz", ".tgz"];

/// Find every installable artifact under `dir`, sorted for determinism.
pub fn discover(dir: &Path) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy();
            ARTIFACT_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
        })
        .map(|entry| entry.into_path())
        .collect();
    found.sort();
    found
}

/// Hex SHA-256 of a local file.
pub fn digest(path: &Path) -> std::io::Result<String> {
    let content = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&content);
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovers_only_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.whl"), b"wheel").unwrap();
        std::fs::write(dir.path().join("sub/b.tar.gz"), b"archive").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"skip me").unwrap();

        let found = discover(dir.path());
        assert_eq!(found.len(), 2);
        assert!(found[0].ends_with("a.whl"));
        assert!(found[1].ends_with("sub/b.tar.gz"));
    }

    #[test]
    fn missing_dir_discovers_nothing() {
        assert!(discover(Path::new("/nonexistent/dist")).is_empty());
    }

    #[test]
    fn digest_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("x.whl");
        std::fs::write(&p, b"content").unwrap();
        assert_eq!(digest(&p).unwrap(), digest(&p).unwrap());
        assert_eq!(digest(&p).unwrap().len(), 64);
    }
}
