//! Apply-list construction and the prune blacklist.

use std::collections::BTreeSet;
use std::path::Path;

use glob::Pattern;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// File extensions recognised as manifests.
pub const MANIFEST_EXTENSIONS: &[&str] = &["json", "yaml", "yml"];

/// Kinds that are never pruned, whatever the configuration says.
pub const FIXED_PRUNE_BLACKLIST: &[&str] = &["apps/v1/ControllerRevision", "batch/v1/Job"];

/// Paths left out of the apply list, matched against paths relative to the
/// target's subpath. A pattern without glob metacharacters matches one exact path.
#[derive(Debug, Clone, Default)]
pub struct FileBlacklist {
    patterns: Vec<Pattern>,
}

impl FileBlacklist {
    /// Compiles the given patterns. Invalid ones are logged and ignored;
    /// configuration validation rejects them before they get here.
    pub fn new<'a>(patterns: impl IntoIterator<Item = &'a String>) -> Self {
        let patterns = patterns
            .into_iter()
            .filter_map(|p| match Pattern::new(p) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!(pattern = %p, error = %e, "Ignoring invalid blacklist pattern");
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    pub fn is_blacklisted(&self, relative_path: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(relative_path))
    }
}

fn has_manifest_extension(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| MANIFEST_EXTENSIONS.contains(&e))
        .unwrap_or(false)
}

/// Keeps manifest files that are not blacklisted, sorted lexicographically.
pub fn filter_apply_list<I>(paths: I, blacklist: &FileBlacklist) -> Vec<String>
where
    I: IntoIterator,
    I::Item: Into<String>,
{
    let mut list: Vec<String> = paths
        .into_iter()
        .map(Into::into)
        .filter(|p| has_manifest_extension(p))
        .filter(|p| !blacklist.is_blacklisted(p))
        .collect();
    list.sort();
    list.dedup();
    list
}

/// Enumerates the apply list for a target.
///
/// Walks `root/subpath` recursively, skipping hidden entries (such as `.git`),
/// and returns paths relative to `root` with `/` separators. Symlinks to
/// files inside `root` are included; directory symlinks are not descended
/// into. A missing subpath yields an empty list.
pub fn build_apply_list(root: &Path, subpath: &str, blacklist: &FileBlacklist) -> Vec<String> {
    let base = root.join(subpath);
    if !base.is_dir() {
        debug!(path = %base.display(), "Target subpath does not exist");
        return Vec::new();
    }
    let canonical_root = root.canonicalize().ok();

    let relative_files = WalkDir::new(&base)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "Failed to read manifest tree entry");
                None
            }
        })
        .filter(|e| is_manifest_file(e, canonical_root.as_deref()))
        .filter_map(|e| e.path().strip_prefix(&base).ok().map(to_slash_path));

    let prefix = subpath.trim_matches('/');
    filter_apply_list(relative_files, blacklist)
        .into_iter()
        .map(|p| {
            if prefix.is_empty() || prefix == "." {
                p
            } else {
                format!("{}/{}", prefix, p)
            }
        })
        .collect()
}

/// Regular files, and symlinks resolving to a file inside `root`.
fn is_manifest_file(entry: &DirEntry, root: Option<&Path>) -> bool {
    let file_type = entry.file_type();
    if file_type.is_file() {
        return true;
    }
    if !file_type.is_symlink() {
        return false;
    }

    match (entry.path().canonicalize(), root) {
        (Ok(resolved), Some(root)) if resolved.starts_with(root) && resolved.is_file() => true,
        _ => {
            debug!(
                path = %entry.path().display(),
                "Skipping symlink that does not resolve to a file in the manifest tree"
            );
            false
        }
    }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().map(|n| n.starts_with('.')).unwrap_or(false)
}

fn to_slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Kinds excluded from pruning: the fixed entries plus configured additions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruneBlacklist {
    kinds: BTreeSet<String>,
}

impl PruneBlacklist {
    pub fn new<'a>(additions: impl IntoIterator<Item = &'a String>) -> Self {
        let mut kinds: BTreeSet<String> =
            FIXED_PRUNE_BLACKLIST.iter().map(|k| k.to_string()).collect();
        kinds.extend(additions.into_iter().cloned());
        Self { kinds }
    }

    /// Returns a copy extended with a target's own additions.
    pub fn with_additions<'a>(&self, additions: impl IntoIterator<Item = &'a String>) -> Self {
        let mut kinds = self.kinds.clone();
        kinds.extend(additions.into_iter().cloned());
        Self { kinds }
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.kinds.contains(kind)
    }

    /// Blacklisted kinds in sorted order.
    pub fn kinds(&self) -> Vec<String> {
        self.kinds.iter().cloned().collect()
    }
}

impl Default for PruneBlacklist {
    fn default() -> Self {
        Self::new(std::iter::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "apiVersion: v1\n").unwrap();
    }

    #[test]
    fn test_filter_keeps_manifests_sorted() {
        let list = filter_apply_list(
            ["b.yaml", "a.json", "a.txt", "z/c.yaml"],
            &FileBlacklist::default(),
        );
        assert_eq!(list, vec!["a.json", "b.yaml", "z/c.yaml"]);
    }

    #[test]
    fn test_filter_extensions() {
        let list = filter_apply_list(
            ["x.yml", "x.YAML", "x.yaml.bak", "README.md", "Makefile", "x.json"],
            &FileBlacklist::default(),
        );
        assert_eq!(list, vec!["x.json", "x.yml"]);
    }

    #[test]
    fn test_filter_blacklist_exact_and_glob() {
        let patterns = vec!["secret.yaml".to_string(), "staging/*".to_string()];
        let blacklist = FileBlacklist::new(&patterns);
        let list = filter_apply_list(
            ["app.yaml", "secret.yaml", "staging/app.yaml", "prod/app.yaml"],
            &blacklist,
        );
        assert_eq!(list, vec!["app.yaml", "prod/app.yaml"]);
    }

    #[test]
    fn test_build_apply_list_walks_subpath() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "teams/a/b.yaml");
        write(dir.path(), "teams/a/a.json");
        write(dir.path(), "teams/a/notes.txt");
        write(dir.path(), "teams/a/z/c.yaml");
        write(dir.path(), "teams/a/.hidden/d.yaml");
        write(dir.path(), "teams/b/other.yaml");

        let list = build_apply_list(dir.path(), "teams/a", &FileBlacklist::default());
        assert_eq!(
            list,
            vec!["teams/a/a.json", "teams/a/b.yaml", "teams/a/z/c.yaml"]
        );
    }

    #[test]
    fn test_build_apply_list_missing_subpath_is_empty() {
        let dir = TempDir::new().unwrap();
        let list = build_apply_list(dir.path(), "missing", &FileBlacklist::default());
        assert!(list.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_build_apply_list_symlinks() {
        use std::os::unix::fs::symlink;

        let dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let root = dir.path().join("repo");
        write(&root, "shared/base.yaml");
        write(&root, "ns/app.yaml");
        write(outside.path(), "leak.yaml");
        write(outside.path(), "more/x.yaml");

        symlink(root.join("shared/base.yaml"), root.join("ns/base.yaml")).unwrap();
        symlink(outside.path().join("leak.yaml"), root.join("ns/leak.yaml")).unwrap();
        symlink(root.join("missing.yaml"), root.join("ns/dangling.yaml")).unwrap();
        symlink(outside.path().join("more"), root.join("ns/more")).unwrap();
        symlink(root.join("shared"), root.join("ns/shared")).unwrap();

        let list = build_apply_list(&root, "ns", &FileBlacklist::default());
        assert_eq!(list, vec!["ns/app.yaml", "ns/base.yaml"]);
    }

    #[test]
    fn test_build_apply_list_is_deterministic() {
        let dir = TempDir::new().unwrap();
        for name in ["c.yaml", "a.yaml", "b/b.yaml", "b/a.yaml"] {
            write(dir.path(), &format!("ns/{}", name));
        }
        let first = build_apply_list(dir.path(), "ns", &FileBlacklist::default());
        let second = build_apply_list(dir.path(), "ns", &FileBlacklist::default());
        assert_eq!(first, second);
        assert_eq!(
            first,
            vec!["ns/a.yaml", "ns/b/a.yaml", "ns/b/b.yaml", "ns/c.yaml"]
        );
    }

    #[test]
    fn test_prune_blacklist_fixed_and_additions() {
        let global = PruneBlacklist::new(&["core/v1/Secret".to_string()]);
        assert!(global.contains("apps/v1/ControllerRevision"));
        assert!(global.contains("batch/v1/Job"));
        assert!(global.contains("core/v1/Secret"));
        assert!(!global.contains("apps/v1/Deployment"));

        let target = global.with_additions(&["apps/v1/Deployment".to_string()]);
        assert!(target.contains("apps/v1/Deployment"));
        assert!(!global.contains("apps/v1/Deployment"));
        assert_eq!(target.kinds().len(), 4);
    }
}
