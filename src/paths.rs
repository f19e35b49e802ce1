//! Virtual path resolution.
//!
//! The bridge never probes the file system itself; everything goes through
//! a [`PathProvider`]. Virtual paths are application relative and use the
//! `~/Controllers/HomeController.rhai` form.

use std::path::{Path, PathBuf};

/// Maps application-relative virtual paths to physical files.
pub trait PathProvider: Send + Sync {
    /// Whether a file exists at the virtual path.
    fn file_exists(&self, virtual_path: &str) -> bool;

    /// Map a virtual path to a physical path.
    fn map_path(&self, virtual_path: &str) -> PathBuf;

    /// Physical root of the application.
    fn application_root(&self) -> &Path;
}

/// Path provider backed by a directory on disk.
#[derive(Debug, Clone)]
pub struct PhysicalPathProvider {
    root: PathBuf,
}

impl PhysicalPathProvider {
    /// Create a provider rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl PathProvider for PhysicalPathProvider {
    fn file_exists(&self, virtual_path: &str) -> bool {
        self.map_path(virtual_path).is_file()
    }

    fn map_path(&self, virtual_path: &str) -> PathBuf {
        let relative = normalize(virtual_path);
        if relative.is_empty() {
            return self.root.clone();
        }
        self.root.join(relative)
    }

    fn application_root(&self) -> &Path {
        &self.root
    }
}

/// Strip the `~` prefix and unify separators.
pub(crate) fn normalize(virtual_path: &str) -> String {
    let unified = virtual_path.replace('\\', "/");
    unified
        .trim_start_matches('~')
        .trim_start_matches('/')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_map_path() {
        let provider = PhysicalPathProvider::new("/srv/app");
        assert_eq!(
            provider.map_path("~/Controllers/HomeController.rhai"),
            PathBuf::from("/srv/app/Controllers/HomeController.rhai")
        );
        assert_eq!(
            provider.map_path("~\\Controllers\\HomeController.rhai"),
            PathBuf::from("/srv/app/Controllers/HomeController.rhai")
        );
        assert_eq!(provider.map_path("~/"), PathBuf::from("/srv/app"));
    }

    #[test]
    fn test_file_exists() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("routes.rhai"), "// routes").unwrap();

        let provider = PhysicalPathProvider::new(temp.path());
        assert!(provider.file_exists("~/routes.rhai"));
        assert!(!provider.file_exists("~/missing.rhai"));
        assert_eq!(provider.application_root(), temp.path());
    }
}
