//! Snapshot catalogs: where a unit's snapshot artifact comes from

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Result, WardenError};
use crate::recovery::SnapshotArtifact;

/// Answers, once per unit at setup time, whether a snapshot is available
pub trait SnapshotCatalog: Send + Sync {
    fn snapshot_for(&self, unit: &str) -> Option<SnapshotArtifact>;
}

/// Snapshots named explicitly per unit
#[derive(Debug, Clone, Default)]
pub struct ExplicitSnapshots {
    entries: HashMap<String, SnapshotArtifact>,
}

impl ExplicitSnapshots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, unit: &str, artifact: SnapshotArtifact) {
        self.entries.insert(unit.to_string(), artifact);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SnapshotCatalog for ExplicitSnapshots {
    fn snapshot_for(&self, unit: &str) -> Option<SnapshotArtifact> {
        self.entries.get(unit).cloned()
    }
}

/// A directory holding `<unit>.tar` artifacts
#[derive(Debug, Clone)]
pub struct SnapshotDir {
    dir: PathBuf,
}

impl SnapshotDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }
}

impl SnapshotCatalog for SnapshotDir {
    fn snapshot_for(&self, unit: &str) -> Option<SnapshotArtifact> {
        let candidate = self.dir.join(format!("{}.tar", unit));
        candidate.is_file().then(|| SnapshotArtifact::new(candidate))
    }
}

/// Consults catalogs in order; the first answer wins
#[derive(Default)]
pub struct ChainedCatalog {
    catalogs: Vec<Box<dyn SnapshotCatalog>>,
}

impl ChainedCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, catalog: impl SnapshotCatalog + 'static) -> Self {
        self.catalogs.push(Box::new(catalog));
        self
    }
}

impl SnapshotCatalog for ChainedCatalog {
    fn snapshot_for(&self, unit: &str) -> Option<SnapshotArtifact> {
        self.catalogs.iter().find_map(|c| c.snapshot_for(unit))
    }
}

/// Parse a `unit=path` command line pair
pub fn parse_snapshot_pair(pair: &str) -> Result<(String, SnapshotArtifact)> {
    let (unit, path) = pair.split_once('=').ok_or_else(|| {
        WardenError::Config(format!("expected UNIT=PATH, got '{}'", pair))
    })?;
    let (unit, path) = (unit.trim(), path.trim());
    if unit.is_empty() || path.is_empty() {
        return Err(WardenError::Config(format!("expected UNIT=PATH, got '{}'", pair)));
    }
    Ok((unit.to_string(), SnapshotArtifact::new(path)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_snapshots() {
        let mut catalog = ExplicitSnapshots::new();
        catalog.insert("web1", SnapshotArtifact::new("/snapshots/web1.tar"));
        assert_eq!(
            catalog.snapshot_for("web1").unwrap().path,
            PathBuf::from("/snapshots/web1.tar")
        );
        assert!(catalog.snapshot_for("db").is_none());
    }

    #[test]
    fn test_snapshot_dir_requires_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("web1.tar"), b"artifact").unwrap();

        let catalog = SnapshotDir::new(dir.path());
        assert_eq!(
            catalog.snapshot_for("web1").unwrap().path,
            dir.path().join("web1.tar")
        );
        assert!(catalog.snapshot_for("db").is_none());
    }

    #[test]
    fn test_chained_catalog_prefers_first() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("web1.tar"), b"artifact").unwrap();
        std::fs::write(dir.path().join("db.tar"), b"artifact").unwrap();

        let mut explicit = ExplicitSnapshots::new();
        explicit.insert("web1", SnapshotArtifact::new("/elsewhere/web1-golden.tar"));

        let catalog = ChainedCatalog::new()
            .with(explicit)
            .with(SnapshotDir::new(dir.path()));

        assert_eq!(
            catalog.snapshot_for("web1").unwrap().path,
            PathBuf::from("/elsewhere/web1-golden.tar")
        );
        assert_eq!(catalog.snapshot_for("db").unwrap().path, dir.path().join("db.tar"));
        assert!(catalog.snapshot_for("cache").is_none());
    }

    #[test]
    fn test_parse_snapshot_pair() {
        let (unit, artifact) = parse_snapshot_pair("web1=/snapshots/web1.tar").unwrap();
        assert_eq!(unit, "web1");
        assert_eq!(artifact.path, PathBuf::from("/snapshots/web1.tar"));
        assert!(parse_snapshot_pair("web1").is_err());
        assert!(parse_snapshot_pair("=/x.tar").is_err());
    }
}
