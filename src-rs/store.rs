//! On-disk snapshot layout and the accept/clear half of the lifecycle.
//!
//! Every logical name owns three files next to each other:
//! `<name><good_ext>` (accepted baseline), `<name><new_ext>` (latest capture)
//! and `<name><diff_ext>` (evidence awaiting review). Groups are directories
//! under the store root.

use crate::config::HarnessOptions;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SnapshotState {
    /// No accepted baseline yet.
    New,
    /// Baseline accepted and no divergent capture pending.
    Stable,
    /// A capture differs from the baseline and awaits review.
    Unstable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotPaths {
    pub good_path: PathBuf,
    pub new_path: PathBuf,
    pub diff_path: PathBuf,
}

/// One pending diff as listed for review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffRecord {
    pub name: String,
    pub good_src: String,
    pub new_src: String,
    pub diff_src: String,
    pub timestamp: String,
    #[serde(skip)]
    modified: Option<SystemTime>,
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
    groups: Vec<String>,
    good_ext: String,
    new_ext: String,
    diff_ext: String,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let defaults = HarnessOptions::default();
        Self {
            root: root.into(),
            groups: Vec::new(),
            good_ext: defaults.good_ext,
            new_ext: defaults.new_ext,
            diff_ext: defaults.diff_ext,
        }
    }

    pub fn from_options(options: &HarnessOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            root: options.screenshot_path.clone(),
            groups: Vec::new(),
            good_ext: options.good_ext.clone(),
            new_ext: options.new_ext.clone(),
            diff_ext: options.diff_ext.clone(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Same root and extensions, no groups.
    pub fn detached(&self) -> Self {
        Self {
            groups: Vec::new(),
            ..self.clone()
        }
    }

    pub fn group(&mut self, segment: &str) -> Result<()> {
        let segment = sanitize_segment(segment)?;
        debug!(group = %segment, depth = self.groups.len() + 1, "enter group");
        self.groups.push(segment);
        Ok(())
    }

    /// Pop the innermost group, restoring the previous path exactly.
    pub fn ungroup(&mut self) -> Result<String> {
        self.groups
            .pop()
            .ok_or_else(|| Error::Configuration("ungroup without a matching group".to_string()))
    }

    pub fn current_path(&self) -> PathBuf {
        let mut path = self.root.clone();
        for segment in &self.groups {
            path.push(segment);
        }
        path
    }

    /// Resolve a name (which may itself contain `/`-separated group segments)
    /// under the current group path.
    pub fn paths(&self, name: &str) -> Result<SnapshotPaths> {
        let mut base = self.current_path();
        let segments: Vec<&str> = name.split('/').filter(|s| !s.is_empty()).collect();
        let Some((leaf, dirs)) = segments.split_last() else {
            return Err(Error::Configuration(format!("invalid snapshot name {name:?}")));
        };
        for dir in dirs {
            base.push(sanitize_segment(dir)?);
        }
        let leaf = sanitize_segment(leaf)?;
        Ok(SnapshotPaths {
            good_path: base.join(format!("{leaf}{}", self.good_ext)),
            new_path: base.join(format!("{leaf}{}", self.new_ext)),
            diff_path: base.join(format!("{leaf}{}", self.diff_ext)),
        })
    }

    pub fn state(&self, name: &str) -> Result<SnapshotState> {
        let paths = self.paths(name)?;
        Ok(if !paths.good_path.exists() {
            SnapshotState::New
        } else if paths.diff_path.exists() {
            SnapshotState::Unstable
        } else {
            SnapshotState::Stable
        })
    }

    /// Promote the pending capture to baseline and drop its diff.
    pub fn accept_diff(&self, name: &str) -> Result<()> {
        let paths = self.paths(name)?;
        match fs::rename(&paths.new_path, &paths.good_path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!(
                    "no candidate screenshot for {name} at {}",
                    paths.new_path.display()
                )));
            }
            Err(err) => return Err(err.into()),
        }
        safe_unlink(&paths.diff_path)?;
        info!(name, "accepted diff");
        Ok(())
    }

    pub fn accept_diffs<S: AsRef<str>>(&self, names: &[S]) -> Result<()> {
        for name in names {
            self.accept_diff(name.as_ref())?;
        }
        Ok(())
    }

    /// Reject every pending diff under the root. Baselines stay.
    pub fn clear_diffs(&self) -> Result<Vec<String>> {
        let detached = self.detached();
        let mut cleared = Vec::new();
        for (name, _) in self.diff_files()? {
            info!(name = %name, "removing");
            let paths = detached.paths(&name)?;
            safe_unlink(&paths.new_path)?;
            safe_unlink(&paths.diff_path)?;
            cleared.push(name);
        }
        Ok(cleared)
    }

    /// Pending diffs, oldest modification first. Re-reads the directory on
    /// every call.
    pub fn list_of_diffs(&self) -> Result<Vec<DiffRecord>> {
        let detached = self.detached();
        let mut records = Vec::new();
        for (name, path) in self.diff_files()? {
            let modified = fs::metadata(&path)?.modified().ok();
            let paths = detached.paths(&name)?;
            records.push(DiffRecord {
                good_src: self.image_ref(&paths.good_path),
                new_src: self.image_ref(&paths.new_path),
                diff_src: self.image_ref(&paths.diff_path),
                timestamp: modified
                    .map(|t| DateTime::<Utc>::from(t).to_rfc3339())
                    .unwrap_or_default(),
                modified,
                name,
            });
        }
        records.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.name.cmp(&b.name)));
        Ok(records)
    }

    /// Remove everything below the root. Test-fixture reset only.
    pub fn destructive_clear_all_snapshots(&self) -> Result<()> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        for entry in entries {
            let path = entry?.path();
            if path.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
        }
        info!(root = %self.root.display(), "cleared all snapshots");
        Ok(())
    }

    /// Map an `/images/` request path back to a file under the root.
    pub fn resolve_artifact(&self, relative: &str) -> Result<PathBuf> {
        let rel = Path::new(relative.trim_start_matches('/'));
        if rel.as_os_str().is_empty()
            || !rel.components().all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(Error::NotFound(format!("no artifact {relative:?}")));
        }
        let path = self.root.join(rel);
        if !path.is_file() {
            return Err(Error::NotFound(format!("no artifact {relative:?}")));
        }
        Ok(path)
    }

    fn image_ref(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        let joined: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        format!("/images/{}", joined.join("/"))
    }

    /// `(name relative to root, path)` for every diff artifact.
    fn diff_files(&self) -> Result<Vec<(String, PathBuf)>> {
        let mut found = Vec::new();
        if self.root.is_dir() {
            collect_with_suffix(&self.root, &self.diff_ext, &mut found)?;
        }
        Ok(found
            .into_iter()
            .filter_map(|path| {
                let rel = path.strip_prefix(&self.root).ok()?;
                let rel = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                let name = rel.strip_suffix(self.diff_ext.as_str())?.to_string();
                Some((name, path))
            })
            .collect())
    }
}

fn collect_with_suffix(dir: &Path, suffix: &str, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_with_suffix(&path, suffix, out)?;
        } else if path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(suffix) && n.len() > suffix.len())
        {
            out.push(path);
        }
    }
    Ok(())
}

/// Create the directory `path` will be written into.
pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Delete a file, treating "already gone" as success.
pub(crate) fn safe_unlink(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Keep `[A-Za-z0-9._-]`, map every other char to `_`, reject dot-only segments.
fn sanitize_segment(input: &str) -> Result<String> {
    let out: String = input
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if out.is_empty() || out.chars().all(|c| c == '.') {
        return Err(Error::Configuration(format!(
            "invalid snapshot name segment {input:?}"
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;
    use tempfile::tempdir;

    fn touch(path: &Path, age_secs: u64) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
        let when = SystemTime::now() - Duration::from_secs(age_secs);
        File::options().write(true).open(path).unwrap().set_modified(when).unwrap();
    }

    #[test]
    fn artifact_paths_use_configured_suffixes() {
        let store = SnapshotStore::new("/shots");
        let paths = store.paths("page1").unwrap();
        assert_eq!(paths.good_path, PathBuf::from("/shots/page1.good.png"));
        assert_eq!(paths.new_path, PathBuf::from("/shots/page1.new.png"));
        assert_eq!(paths.diff_path, PathBuf::from("/shots/page1.diff.png"));

        assert_eq!(
            store.paths("login form:step 2").unwrap().good_path,
            PathBuf::from("/shots/login_form_step_2.good.png")
        );
        assert!(store.paths("..").is_err());
        assert!(store.paths("").is_err());
    }

    #[test]
    fn non_ascii_names_keep_their_own_artifacts() {
        let store = SnapshotStore::new("/shots");
        let accented = store.paths("héllo").unwrap().good_path;
        assert_eq!(accented, PathBuf::from("/shots/h_llo.good.png"));
        assert_ne!(accented, store.paths("hllo").unwrap().good_path);
        assert_eq!(
            store.paths("日本").unwrap().new_path,
            PathBuf::from("/shots/__.new.png")
        );
    }

    #[test]
    fn groups_nest_and_restore() {
        let mut store = SnapshotStore::new("/shots");
        store.group("group1").unwrap();
        assert_eq!(store.current_path(), PathBuf::from("/shots/group1"));
        store.group("group2").unwrap();
        assert_eq!(store.current_path(), PathBuf::from("/shots/group1/group2"));
        assert_eq!(
            store.paths("p").unwrap().new_path,
            PathBuf::from("/shots/group1/group2/p.new.png")
        );
        assert_eq!(store.ungroup().unwrap(), "group2");
        assert_eq!(store.current_path(), PathBuf::from("/shots/group1"));
        store.ungroup().unwrap();
        assert!(matches!(store.ungroup(), Err(Error::Configuration(_))));
    }

    #[test]
    fn accept_without_candidate_is_not_found() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        assert!(matches!(store.accept_diff("ghost"), Err(Error::NotFound(_))));
    }

    #[test]
    fn accept_promotes_candidate_and_drops_diff() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let paths = store.paths("page").unwrap();
        fs::write(&paths.new_path, b"candidate").unwrap();
        fs::write(&paths.diff_path, b"diff").unwrap();
        assert_eq!(store.state("page").unwrap(), SnapshotState::New);

        store.accept_diff("page").unwrap();
        assert_eq!(fs::read(&paths.good_path).unwrap(), b"candidate");
        assert!(!paths.new_path.exists());
        assert!(!paths.diff_path.exists());
        assert_eq!(store.state("page").unwrap(), SnapshotState::Stable);
    }

    #[test]
    fn listing_is_recursive_and_oldest_first() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        touch(&dir.path().join("b.diff.png"), 300);
        touch(&dir.path().join("nested/a.diff.png"), 100);
        touch(&dir.path().join("c.diff.png"), 200);
        touch(&dir.path().join("c.good.png"), 900);

        let diffs = store.list_of_diffs().unwrap();
        let names: Vec<&str> = diffs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["b", "c", "nested/a"]);
        assert_eq!(diffs[2].good_src, "/images/nested/a.good.png");
        assert_eq!(diffs[2].new_src, "/images/nested/a.new.png");
        assert_eq!(diffs[2].diff_src, "/images/nested/a.diff.png");
        assert!(!diffs[0].timestamp.is_empty());
    }

    #[test]
    fn clear_diffs_keeps_baselines() {
        let dir = tempdir().unwrap();
        let mut store = SnapshotStore::new(dir.path());
        store.group("g").unwrap();
        let paths = store.paths("page").unwrap();
        touch(&paths.good_path, 0);
        touch(&paths.new_path, 0);
        touch(&paths.diff_path, 0);

        let cleared = store.clear_diffs().unwrap();
        assert_eq!(cleared, vec!["g/page".to_string()]);
        assert!(paths.good_path.exists());
        assert!(!paths.new_path.exists());
        assert!(!paths.diff_path.exists());
        assert!(store.list_of_diffs().unwrap().is_empty());
    }

    #[test]
    fn destructive_clear_empties_root() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("root"));
        store.destructive_clear_all_snapshots().unwrap();
        touch(&dir.path().join("root/x.good.png"), 0);
        touch(&dir.path().join("root/deep/y.new.png"), 0);
        store.destructive_clear_all_snapshots().unwrap();
        assert!(dir.path().join("root").is_dir());
        assert_eq!(fs::read_dir(dir.path().join("root")).unwrap().count(), 0);
    }

    #[test]
    fn artifact_resolution_stays_inside_root() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        touch(&dir.path().join("g/p.diff.png"), 0);
        assert_eq!(
            store.resolve_artifact("g/p.diff.png").unwrap(),
            dir.path().join("g/p.diff.png")
        );
        assert!(store.resolve_artifact("../etc/passwd").is_err());
        assert!(store.resolve_artifact("/g/missing.png").is_err());
    }
}
