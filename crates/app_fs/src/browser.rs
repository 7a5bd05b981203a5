//! File system browser - root discovery, directory listing and creation

use crate::{path, FsError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Default name of the folder created by [`FilesystemAccessor::discover_default_media_folder`]
pub const DEFAULT_MEDIA_FOLDER: &str = "streamviomedia";

/// Mount types that never hold user media
const PSEUDO_FILESYSTEMS: &[&str] = &[
    "proc", "sysfs", "devtmpfs", "devpts", "cgroup", "cgroup2", "securityfs",
    "pstore", "bpf", "tracefs", "debugfs", "mqueue", "hugetlbfs", "fusectl",
    "configfs", "autofs", "binfmt_misc", "rpc_pipefs", "nsfs", "efivarfs",
    "selinuxfs", "ramfs",
];

/// Mount point prefixes that are system internals
const SYSTEM_MOUNT_PREFIXES: &[&str] = &["/proc", "/sys", "/dev", "/run", "/boot", "/snap"];

/// One entry of a directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesystemEntry {
    pub name: String,
    pub path: String,
    pub is_directory: bool,
}

impl FilesystemEntry {
    fn directory(path: String) -> Self {
        let name = path::file_name(&path)
            .map(str::to_string)
            .unwrap_or_else(|| path.clone());
        Self {
            name,
            path,
            is_directory: true,
        }
    }
}

/// Result of browsing a directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryListing {
    pub path: String,
    pub contents: Vec<FilesystemEntry>,
}

/// A way of finding top-level locations
///
/// Strategies are evaluated in order; the first one yielding at least one
/// usable location wins.
#[derive(Debug, Clone)]
pub enum RootStrategy {
    /// Parse a mount table in `/proc/mounts` format
    MountTable(PathBuf),
    /// Probe `A:\` through `Z:\`
    DriveLetters,
    /// Probe a fixed list of well-known locations
    Candidates(Vec<PathBuf>),
}

impl RootStrategy {
    fn discover(&self) -> Vec<FilesystemEntry> {
        let found: Vec<String> = match self {
            RootStrategy::MountTable(table) => match fs::read_to_string(table) {
                Ok(content) => parse_mount_table(&content),
                Err(e) => {
                    tracing::debug!(table = %table.display(), error = %e, "Mount table unavailable");
                    Vec::new()
                }
            },
            RootStrategy::DriveLetters => (b'A'..=b'Z')
                .map(|letter| format!("{}:/", letter as char))
                .filter(|drive| Path::new(drive).exists())
                .collect(),
            RootStrategy::Candidates(candidates) => candidates
                .iter()
                .map(|c| path::normalize(&c.to_string_lossy()))
                .collect(),
        };

        let mut entries: Vec<FilesystemEntry> = Vec::new();
        for location in found {
            if entries.iter().any(|e| e.path == location) {
                continue;
            }
            if fs::read_dir(&location).is_ok() {
                entries.push(FilesystemEntry::directory(location));
            } else {
                tracing::trace!(location = %location, "Root candidate not listable");
            }
        }
        entries
    }
}

/// Extract user-facing mount points from a mount table
fn parse_mount_table(content: &str) -> Vec<String> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let _device = fields.next()?;
            let mount_point = unescape_mount_field(fields.next()?);
            let fs_type = fields.next()?;

            if PSEUDO_FILESYSTEMS.contains(&fs_type) {
                return None;
            }
            if SYSTEM_MOUNT_PREFIXES
                .iter()
                .any(|prefix| mount_point == *prefix || mount_point.starts_with(&format!("{}/", prefix)))
            {
                return None;
            }
            Some(path::normalize(&mount_point))
        })
        .collect()
}

/// Mount tables escape whitespace as octal (`\040` for a space)
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let value = std::str::from_utf8(&bytes[i + 1..i + 4])
                .ok()
                .and_then(|octal| u8::from_str_radix(octal, 8).ok());
            if let Some(value) = value {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// Well-known locations probed when OS enumeration yields nothing
pub fn default_root_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if let Some(home) = dirs_next::home_dir() {
        candidates.push(home);
    }
    candidates.push(std::env::temp_dir());

    #[cfg(not(windows))]
    {
        for fixed in ["/tmp", "/media", "/mnt", "/home", "/srv"] {
            candidates.push(PathBuf::from(fixed));
        }
    }

    #[cfg(windows)]
    {
        for drive in ["C:\\", "D:\\", "E:\\"] {
            candidates.push(PathBuf::from(drive));
        }
    }

    candidates
}

fn default_strategies() -> Vec<RootStrategy> {
    let mut strategies = Vec::new();

    #[cfg(windows)]
    strategies.push(RootStrategy::DriveLetters);

    #[cfg(not(windows))]
    strategies.push(RootStrategy::MountTable(PathBuf::from("/proc/mounts")));

    strategies.push(RootStrategy::Candidates(default_root_candidates()));
    strategies
}

/// Lists, browses and creates directories on the host file system
#[derive(Debug, Clone)]
pub struct FilesystemAccessor {
    strategies: Vec<RootStrategy>,
    show_hidden: bool,
    media_folder_name: String,
}

impl Default for FilesystemAccessor {
    fn default() -> Self {
        Self::new()
    }
}

impl FilesystemAccessor {
    pub fn new() -> Self {
        Self::with_strategies(default_strategies())
    }

    pub fn with_strategies(strategies: Vec<RootStrategy>) -> Self {
        Self {
            strategies,
            show_hidden: true,
            media_folder_name: DEFAULT_MEDIA_FOLDER.to_string(),
        }
    }

    /// Add extra candidates in front of the built-in fallback list
    pub fn with_extra_candidates(mut self, extra: Vec<PathBuf>) -> Self {
        if extra.is_empty() {
            return self;
        }
        let position = self
            .strategies
            .iter()
            .position(|s| matches!(s, RootStrategy::Candidates(_)));

        match position {
            Some(index) => {
                if let RootStrategy::Candidates(candidates) = &mut self.strategies[index] {
                    let mut merged = extra;
                    merged.append(candidates);
                    *candidates = merged;
                }
            }
            None => self.strategies.push(RootStrategy::Candidates(extra)),
        }
        self
    }

    pub fn show_hidden(mut self, show: bool) -> Self {
        self.show_hidden = show;
        self
    }

    pub fn media_folder_name(mut self, name: impl Into<String>) -> Self {
        self.media_folder_name = name.into();
        self
    }

    /// Find top-level locations the service can browse from
    ///
    /// An empty result means no accessible location was found; it is not an error.
    pub fn list_roots(&self) -> Vec<FilesystemEntry> {
        for (index, strategy) in self.strategies.iter().enumerate() {
            let found = strategy.discover();
            if !found.is_empty() {
                tracing::debug!(strategy = index, roots = found.len(), "Root discovery succeeded");
                return found;
            }
            tracing::debug!(strategy = index, "Root strategy yielded nothing");
        }

        tracing::warn!("No accessible filesystem location found");
        Vec::new()
    }

    /// List the contents of a directory
    pub fn browse(&self, raw: &str) -> Result<DirectoryListing> {
        let normalized = validate(raw)?;

        let metadata = fs::metadata(&normalized).map_err(|e| FsError::from_io(e, &normalized))?;
        if !metadata.is_dir() {
            return Err(FsError::InvalidPath(format!("Not a directory: {}", normalized)));
        }

        let mut contents = Vec::new();
        for entry in fs::read_dir(&normalized).map_err(|e| FsError::from_io(e, &normalized))? {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue, // Skip entries we can't read
            };

            let name = entry.file_name().to_string_lossy().to_string();
            if !self.show_hidden && is_hidden_file(&entry.path(), &name) {
                continue;
            }

            // Follow symlinks so linked media folders show up as directories
            let is_directory = fs::metadata(entry.path())
                .map(|m| m.is_dir())
                .unwrap_or(false);

            contents.push(FilesystemEntry {
                path: path::join(&normalized, &name),
                name,
                is_directory,
            });
        }

        tracing::debug!(path = %normalized, entries = contents.len(), "Directory listed");
        Ok(DirectoryListing {
            path: normalized,
            contents,
        })
    }

    /// Create a single directory; an existing directory is a success
    pub fn create_directory(&self, raw: &str) -> Result<()> {
        let normalized = validate(raw)?;

        match fs::metadata(&normalized) {
            Ok(m) if m.is_dir() => {
                tracing::debug!(path = %normalized, "Directory already exists");
                return Ok(());
            }
            Ok(_) => {
                return Err(FsError::Conflict(format!(
                    "Path exists and is not a directory: {}",
                    normalized
                )))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(FsError::from_io(e, &normalized)),
        }

        match fs::create_dir(&normalized) {
            Ok(()) => {
                tracing::info!(path = %normalized, "Directory created");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                // Lost a race with another creator
                if Path::new(&normalized).is_dir() {
                    Ok(())
                } else {
                    Err(FsError::Conflict(format!(
                        "Path exists and is not a directory: {}",
                        normalized
                    )))
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(FsError::NotFound(format!(
                "Parent directory does not exist: {}",
                parent_display(&normalized)
            ))),
            Err(e) => Err(FsError::from_io(e, &parent_display(&normalized))),
        }
    }

    /// Best-effort creation of a default media folder
    ///
    /// Returns `None` when no base accepts the folder. Callers treat that as
    /// a normal outcome.
    pub fn discover_default_media_folder(&self, roots: &[FilesystemEntry]) -> Option<String> {
        let preferred = preferred_base(roots);
        let alternate = alternate_base(roots, &preferred);

        place_media_folder(
            std::iter::once(preferred).chain(alternate),
            &self.media_folder_name,
            |target| self.create_directory(target),
        )
    }
}

/// Create `folder` under the first base that accepts it. Only a
/// `PermissionDenied` on the first base moves on to the next one.
fn place_media_folder(
    bases: impl Iterator<Item = String>,
    folder: &str,
    mut create: impl FnMut(&str) -> Result<()>,
) -> Option<String> {
    for (attempt, base) in bases.take(2).enumerate() {
        let target = path::join(&base, folder);
        match create(&target) {
            Ok(()) => {
                tracing::info!(path = %target, "Default media folder ready");
                return Some(target);
            }
            Err(FsError::PermissionDenied { .. }) if attempt == 0 => {
                tracing::warn!(base = %base, "Cannot create media folder, trying alternate base");
            }
            Err(e) => {
                tracing::warn!(base = %base, error = %e, "Default media folder unavailable");
                return None;
            }
        }
    }

    None
}

fn validate(raw: &str) -> Result<String> {
    if raw.trim().is_empty() {
        return Err(FsError::InvalidPath("Path is empty".to_string()));
    }
    if raw.contains('\0') {
        return Err(FsError::InvalidPath("Path contains a NUL byte".to_string()));
    }

    let normalized = path::normalize(raw);
    if !path::is_absolute(&normalized) {
        return Err(FsError::InvalidPath(format!("Path must be absolute: {}", raw)));
    }
    Ok(normalized)
}

fn parent_display(normalized: &str) -> String {
    let parent = path::parent_of(normalized);
    if parent.is_empty() {
        "/".to_string()
    } else {
        parent
    }
}

fn temp_base() -> String {
    path::normalize(&std::env::temp_dir().to_string_lossy())
}

fn is_home_like(location: &str) -> bool {
    if let Some(home) = dirs_next::home_dir() {
        if path::normalize(&home.to_string_lossy()) == location {
            return true;
        }
    }
    matches!(path::segments(location).first(), Some(&"home") | Some(&"Users"))
}

fn preferred_base(roots: &[FilesystemEntry]) -> String {
    roots
        .iter()
        .find(|r| is_home_like(&r.path))
        .or_else(|| roots.iter().find(|r| r.path.starts_with('/')))
        .map(|r| r.path.clone())
        .unwrap_or_else(temp_base)
}

fn alternate_base(roots: &[FilesystemEntry], preferred: &str) -> Option<String> {
    let temp = temp_base();
    if temp != preferred {
        return Some(temp);
    }
    roots
        .iter()
        .map(|r| r.path.clone())
        .find(|p| p != preferred)
}

/// Sort entries for display: directories first, then natural name order
pub fn sort_entries(entries: &mut [FilesystemEntry]) {
    entries.sort_by(|a, b| {
        if a.is_directory != b.is_directory {
            return if a.is_directory {
                std::cmp::Ordering::Less
            } else {
                std::cmp::Ordering::Greater
            };
        }
        natural_sort_key(&a.name).cmp(&natural_sort_key(&b.name))
    });
}

/// Generate a natural sort key (handles numbers correctly)
/// "Episode 2" < "Episode 10"
fn natural_sort_key(s: &str) -> Vec<NaturalSortPart> {
    let mut parts = Vec::new();
    let mut current_num = String::new();
    let mut current_str = String::new();

    for c in s.chars() {
        if c.is_ascii_digit() {
            if !current_str.is_empty() {
                parts.push(NaturalSortPart::Str(current_str.to_lowercase()));
                current_str.clear();
            }
            current_num.push(c);
        } else {
            if !current_num.is_empty() {
                if let Ok(n) = current_num.parse::<u64>() {
                    parts.push(NaturalSortPart::Num(n));
                }
                current_num.clear();
            }
            current_str.push(c);
        }
    }

    if !current_num.is_empty() {
        if let Ok(n) = current_num.parse::<u64>() {
            parts.push(NaturalSortPart::Num(n));
        }
    }
    if !current_str.is_empty() {
        parts.push(NaturalSortPart::Str(current_str.to_lowercase()));
    }

    parts
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum NaturalSortPart {
    Num(u64),
    Str(String),
}

#[cfg(windows)]
fn is_hidden_file(path: &Path, _name: &str) -> bool {
    use std::os::windows::fs::MetadataExt;

    const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;

    fs::metadata(path)
        .map(|m| m.file_attributes() & FILE_ATTRIBUTE_HIDDEN != 0)
        .unwrap_or(false)
}

#[cfg(not(windows))]
fn is_hidden_file(_path: &Path, name: &str) -> bool {
    name.starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn display(p: &Path) -> String {
        path::normalize(&p.to_string_lossy())
    }

    #[test]
    fn test_natural_sort() {
        let mut entries: Vec<FilesystemEntry> = ["ep10.mkv", "ep2.mkv", "Season 1", "ep1.mkv"]
            .iter()
            .map(|n| FilesystemEntry {
                name: n.to_string(),
                path: format!("/m/{}", n),
                is_directory: n.starts_with("Season"),
            })
            .collect();
        sort_entries(&mut entries);
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Season 1", "ep1.mkv", "ep2.mkv", "ep10.mkv"]);
    }

    #[test]
    fn test_parse_mount_table_filters_pseudo() {
        let table = "\
proc /proc proc rw 0 0
sysfs /sys sysfs rw 0 0
/dev/sda1 / ext4 rw 0 0
/dev/sdb1 /media/My\\040Disk ext4 rw 0 0
tmpfs /run/user/1000 tmpfs rw 0 0
";
        let mounts = parse_mount_table(table);
        assert_eq!(mounts, vec!["/".to_string(), "/media/My Disk".to_string()]);
    }

    #[test]
    fn test_fallback_surfaces_temp_dir() {
        let empty_table = tempfile::NamedTempFile::new().unwrap();
        let accessor = FilesystemAccessor::with_strategies(vec![
            RootStrategy::MountTable(empty_table.path().to_path_buf()),
            RootStrategy::Candidates(vec![
                PathBuf::from("/definitely/not/here"),
                std::env::temp_dir(),
            ]),
        ]);

        let roots = accessor.list_roots();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].path, display(&std::env::temp_dir()));
        assert!(roots[0].is_directory);
    }

    #[test]
    fn test_list_roots_empty_is_not_error() {
        let accessor = FilesystemAccessor::with_strategies(vec![RootStrategy::Candidates(vec![
            PathBuf::from("/definitely/not/here"),
        ])]);
        assert!(accessor.list_roots().is_empty());
    }

    #[test]
    fn test_browse_lists_entries() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("Movies")).unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let accessor = FilesystemAccessor::new();
        let listing = accessor.browse(&dir.path().to_string_lossy()).unwrap();

        assert_eq!(listing.path, display(dir.path()));
        assert_eq!(listing.contents.len(), 2);
        let movies = listing.contents.iter().find(|e| e.name == "Movies").unwrap();
        assert!(movies.is_directory);
        assert_eq!(movies.path, path::join(&listing.path, "Movies"));
    }

    #[test]
    fn test_browse_hides_dotfiles_when_configured() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".hidden"), b"x").unwrap();
        fs::write(dir.path().join("shown"), b"x").unwrap();

        let accessor = FilesystemAccessor::new().show_hidden(false);
        let listing = accessor.browse(&dir.path().to_string_lossy()).unwrap();
        assert_eq!(listing.contents.len(), 1);
        assert_eq!(listing.contents[0].name, "shown");
    }

    #[test]
    fn test_browse_errors() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("file.txt");
        fs::write(&file, b"x").unwrap();
        let accessor = FilesystemAccessor::new();

        assert!(matches!(accessor.browse(""), Err(FsError::InvalidPath(_))));
        assert!(matches!(accessor.browse("relative/dir"), Err(FsError::InvalidPath(_))));
        assert!(matches!(
            accessor.browse(&file.to_string_lossy()),
            Err(FsError::InvalidPath(_))
        ));
        assert!(matches!(
            accessor.browse(&dir.path().join("missing").to_string_lossy()),
            Err(FsError::NotFound(_))
        ));
    }

    #[test]
    fn test_create_directory_idempotent() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("library");
        let target = target.to_string_lossy();
        let accessor = FilesystemAccessor::new();

        accessor.create_directory(&target).unwrap();
        let first = accessor.browse(&dir.path().to_string_lossy()).unwrap().contents;
        accessor.create_directory(&target).unwrap();
        let second = accessor.browse(&dir.path().to_string_lossy()).unwrap().contents;

        assert_eq!(first, second);
        assert!(Path::new(target.as_ref()).is_dir());
    }

    #[test]
    fn test_create_directory_conflict_and_missing_parent() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("taken");
        fs::write(&file, b"x").unwrap();
        let accessor = FilesystemAccessor::new();

        assert!(matches!(
            accessor.create_directory(&file.to_string_lossy()),
            Err(FsError::Conflict(_))
        ));
        assert!(matches!(
            accessor.create_directory(&dir.path().join("a/b").to_string_lossy()),
            Err(FsError::NotFound(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_discover_default_media_folder() {
        let dir = TempDir::new().unwrap();
        let roots = vec![FilesystemEntry::directory(display(dir.path()))];

        let accessor = FilesystemAccessor::new();
        let folder = accessor.discover_default_media_folder(&roots).unwrap();

        assert_eq!(folder, path::join(&display(dir.path()), DEFAULT_MEDIA_FOLDER));
        assert!(Path::new(&folder).is_dir());
    }

    fn denied(path: &str) -> FsError {
        FsError::PermissionDenied {
            path: path.to_string(),
            hint: String::new(),
        }
    }

    #[test]
    fn test_media_folder_falls_back_once_on_permission_denied() {
        let bases = ["/srv", "/tmp", "/mnt"].map(String::from);

        let mut tried = Vec::new();
        let folder = place_media_folder(bases.clone().into_iter(), "streamviomedia", |target| {
            tried.push(target.to_string());
            if target.starts_with("/srv") {
                Err(denied(target))
            } else {
                Ok(())
            }
        });
        assert_eq!(folder.as_deref(), Some("/tmp/streamviomedia"));
        assert_eq!(tried, vec!["/srv/streamviomedia", "/tmp/streamviomedia"]);

        // The alternate is the last attempt
        let mut attempts = 0;
        let folder = place_media_folder(bases.clone().into_iter(), "streamviomedia", |target| {
            attempts += 1;
            Err(denied(target))
        });
        assert!(folder.is_none());
        assert_eq!(attempts, 2);

        // Other failures do not fall back
        let mut attempts = 0;
        let folder = place_media_folder(bases.into_iter(), "streamviomedia", |target| {
            attempts += 1;
            Err(FsError::NotFound(target.to_string()))
        });
        assert!(folder.is_none());
        assert_eq!(attempts, 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_discover_with_read_only_base() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let locked = dir.path().join("locked");
        fs::create_dir(&locked).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();

        let name = format!("streamvio-discover-{}", std::process::id());
        let accessor = FilesystemAccessor::new().media_folder_name(name.clone());
        let roots = vec![FilesystemEntry::directory(display(&locked))];
        let folder = accessor.discover_default_media_folder(&roots).unwrap();

        // Unprivileged runs land in the temp dir; root can write the locked base
        let in_locked = path::join(&display(&locked), &name);
        let in_temp = path::join(&temp_base(), &name);
        assert!(folder == in_locked || folder == in_temp, "unexpected {folder}");
        assert!(Path::new(&folder).is_dir());

        fs::remove_dir(&folder).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
    }
}
