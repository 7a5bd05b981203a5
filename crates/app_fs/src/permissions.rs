//! Permission diagnosis and best-effort repair
//!
//! `check` probes a directory for read and write access and never fails for
//! an inaccessible path: inaccessibility is reported in the returned status.
//! `repair` works with the privilege the process already holds. When that is
//! not enough it returns the command an administrator would run instead.

use crate::path;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static PROBE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Paths whose state is remembered; the least recently probed go first
const MAX_TRACKED_PATHS: usize = 1024;

/// Outcome of a permission probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionStatus {
    pub has_access: bool,
    pub can_create: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Outcome of a repair attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairResult {
    pub success: bool,
    pub message: String,
    /// Command for an administrator to run by hand. Never executed here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Diagnostic state of a probed path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeState {
    Unchecked,
    Checking,
    Accessible,
    Inaccessible,
    Repairing,
    Failed,
}

#[derive(Debug, Default)]
struct ProbeStates {
    states: HashMap<String, ProbeState>,
    /// Least recently probed first
    order: VecDeque<String>,
}

impl ProbeStates {
    fn set(&mut self, normalized: &str, state: ProbeState) {
        if self.states.insert(normalized.to_string(), state).is_some() {
            self.order.retain(|p| p != normalized);
        }
        self.order.push_back(normalized.to_string());

        while self.order.len() > MAX_TRACKED_PATHS {
            if let Some(oldest) = self.order.pop_front() {
                self.states.remove(&oldest);
            }
        }
    }
}

/// Probes and repairs directory access for the service account
#[derive(Debug)]
pub struct PermissionDiagnostics {
    account: String,
    states: Mutex<ProbeStates>,
}

impl Default for PermissionDiagnostics {
    fn default() -> Self {
        Self::new(current_account())
    }
}

impl PermissionDiagnostics {
    /// `account` is the user name put into suggested commands
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            states: Mutex::new(ProbeStates::default()),
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// Last known diagnostic state of a path
    pub fn state(&self, raw: &str) -> ProbeState {
        self.states
            .lock()
            .states
            .get(&path::normalize(raw))
            .copied()
            .unwrap_or(ProbeState::Unchecked)
    }

    fn set_state(&self, normalized: &str, state: ProbeState) {
        self.states.lock().set(normalized, state);
    }

    /// Probe a path for read and write access
    pub fn check(&self, raw: &str) -> PermissionStatus {
        let normalized = path::normalize(raw);
        self.set_state(&normalized, ProbeState::Checking);

        let status = probe(&normalized);
        self.set_state(
            &normalized,
            if status.has_access {
                ProbeState::Accessible
            } else {
                ProbeState::Inaccessible
            },
        );

        tracing::info!(
            path = %normalized,
            has_access = status.has_access,
            can_create = status.can_create,
            "Permission check"
        );
        status
    }

    /// Try to make a path usable by the service
    ///
    /// Does not re-check afterwards; call [`check`](Self::check) again to
    /// observe the new state.
    pub fn repair(&self, raw: &str) -> RepairResult {
        let normalized = path::normalize(raw);
        self.set_state(&normalized, ProbeState::Repairing);

        let result = self.attempt_repair(&normalized);
        self.set_state(
            &normalized,
            if result.success {
                ProbeState::Accessible
            } else {
                ProbeState::Failed
            },
        );

        if result.success {
            tracing::info!(path = %normalized, "Permission repair succeeded");
        } else {
            tracing::warn!(
                path = %normalized,
                suggested = result.suggested_command.as_deref().unwrap_or(""),
                "Permission repair failed"
            );
        }
        result
    }

    fn attempt_repair(&self, normalized: &str) -> RepairResult {
        if normalized.is_empty() || !path::is_absolute(normalized) {
            return RepairResult {
                success: false,
                message: format!("Invalid path: {:?}", normalized),
                suggested_command: None,
                details: None,
            };
        }

        let target = Path::new(normalized);
        match fs::metadata(target) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => match create_with_mode(target) {
                Ok(()) => RepairResult {
                    success: true,
                    message: "Directory created".to_string(),
                    suggested_command: None,
                    details: None,
                },
                Err(e) => self.manual(normalized, false, "Could not create the directory", &e),
            },
            Err(e) => self.manual(normalized, true, "Could not inspect the path", &e),
            Ok(m) if !m.is_dir() => RepairResult {
                success: false,
                message: "Path exists and is not a directory".to_string(),
                suggested_command: None,
                details: Some(normalized.to_string()),
            },
            Ok(m) => {
                if fs::read_dir(target).is_ok() && write_probe(target).is_ok() {
                    return RepairResult {
                        success: true,
                        message: "Directory is already accessible".to_string(),
                        suggested_command: None,
                        details: None,
                    };
                }

                if let Err(e) = grant_owner_access(target, &m) {
                    return self.manual(normalized, true, "Could not change permissions", &e);
                }

                match write_probe(target) {
                    Ok(()) => RepairResult {
                        success: true,
                        message: "Permissions updated".to_string(),
                        suggested_command: None,
                        details: ownership_details(&m),
                    },
                    Err(e) => self.manual(
                        normalized,
                        true,
                        "Permissions changed but the directory is still not writable",
                        &e,
                    ),
                }
            }
        }
    }

    fn manual(&self, normalized: &str, exists: bool, message: &str, error: &io::Error) -> RepairResult {
        RepairResult {
            success: false,
            message: format!("{}; run the suggested command as an administrator", message),
            suggested_command: Some(suggested_command(normalized, &self.account, exists)),
            details: Some(error.to_string()),
        }
    }
}

fn probe(normalized: &str) -> PermissionStatus {
    if normalized.is_empty() || !path::is_absolute(normalized) {
        return PermissionStatus {
            has_access: false,
            can_create: false,
            message: "Invalid path".to_string(),
            details: Some(format!("Path must be absolute: {:?}", normalized)),
        };
    }

    let target = Path::new(normalized);
    match fs::metadata(target) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let ancestor = nearest_existing_ancestor(target);
            let can_create = ancestor.as_ref().map_or(false, |a| a.is_dir());
            let writable = ancestor
                .as_ref()
                .map_or(false, |a| a.is_dir() && write_probe(a).is_ok());

            let details = match &ancestor {
                Some(a) if writable => format!("{} is writable by the service", a.display()),
                Some(a) => format!(
                    "{} is not writable by the service; repair or create the directory manually",
                    a.display()
                ),
                None => "No existing ancestor".to_string(),
            };

            PermissionStatus {
                has_access: false,
                can_create,
                message: if can_create {
                    "Directory does not exist but can be created".to_string()
                } else {
                    "Directory does not exist".to_string()
                },
                details: Some(details),
            }
        }
        Err(e) => PermissionStatus {
            has_access: false,
            can_create: false,
            message: "Access denied".to_string(),
            details: Some(e.to_string()),
        },
        Ok(m) if !m.is_dir() => PermissionStatus {
            has_access: false,
            can_create: false,
            message: "Path exists and is not a directory".to_string(),
            details: None,
        },
        Ok(m) => {
            let readable = fs::read_dir(target).is_ok();
            let writable = write_probe(target).is_ok();

            let message = match (readable, writable) {
                (true, true) => "Directory is readable and writable",
                (false, _) => "Directory is not readable by the service",
                (true, false) => "Directory is readable but not writable by the service",
            };

            PermissionStatus {
                has_access: readable && writable,
                can_create: false,
                message: message.to_string(),
                details: ownership_details(&m),
            }
        }
    }
}

fn nearest_existing_ancestor(target: &Path) -> Option<PathBuf> {
    let mut current = target.parent();
    while let Some(candidate) = current {
        if candidate.exists() {
            return Some(candidate.to_path_buf());
        }
        current = candidate.parent();
    }
    None
}

/// Create and remove a marker file
fn write_probe(dir: &Path) -> io::Result<()> {
    let marker = dir.join(format!(
        ".streamvio-probe-{}-{}",
        std::process::id(),
        PROBE_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    OpenOptions::new().write(true).create_new(true).open(&marker)?;
    fs::remove_file(&marker)
}

#[cfg(unix)]
fn create_with_mode(target: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::create_dir_all(target)?;
    fs::set_permissions(target, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn create_with_mode(target: &Path) -> io::Result<()> {
    fs::create_dir_all(target)
}

#[cfg(unix)]
fn grant_owner_access(target: &Path, metadata: &fs::Metadata) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = metadata.permissions().mode() | 0o700;
    fs::set_permissions(target, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn grant_owner_access(target: &Path, metadata: &fs::Metadata) -> io::Result<()> {
    let mut permissions = metadata.permissions();
    #[allow(clippy::permissions_set_readonly_false)]
    permissions.set_readonly(false);
    fs::set_permissions(target, permissions)
}

#[cfg(unix)]
fn ownership_details(metadata: &fs::Metadata) -> Option<String> {
    use std::os::unix::fs::MetadataExt;

    // SAFETY: geteuid has no preconditions and cannot fail
    let euid = unsafe { libc::geteuid() };
    Some(format!(
        "owner uid {}, gid {}, mode {:o}; service runs as uid {}",
        metadata.uid(),
        metadata.gid(),
        metadata.mode() & 0o7777,
        euid
    ))
}

#[cfg(not(unix))]
fn ownership_details(metadata: &fs::Metadata) -> Option<String> {
    Some(format!("read-only: {}", metadata.permissions().readonly()))
}

/// Name of the account the service runs as
pub fn current_account() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| fallback_account())
}

#[cfg(unix)]
fn fallback_account() -> String {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() }.to_string()
}

#[cfg(not(unix))]
fn fallback_account() -> String {
    "streamvio".to_string()
}

/// Manual command granting `account` access to `path`
#[cfg(not(windows))]
pub fn suggested_command(path: &str, account: &str, exists: bool) -> String {
    let quoted = shell_quote(path);
    if exists {
        format!(
            "sudo chown -R {} {} && sudo chmod -R u+rwX {}",
            account, quoted, quoted
        )
    } else {
        format!(
            "sudo mkdir -p {} && sudo chown {} {} && sudo chmod 755 {}",
            quoted, account, quoted, quoted
        )
    }
}

#[cfg(windows)]
pub fn suggested_command(path: &str, account: &str, exists: bool) -> String {
    let native = path.replace('/', "\\");
    let grant = format!("icacls \"{}\" /grant \"{}:(OI)(CI)F\" /T", native, account);
    if exists {
        grant
    } else {
        format!("mkdir \"{}\" && {}", native, grant)
    }
}

/// Short hint attached to permission errors
pub(crate) fn remediation_hint(path: &str) -> String {
    format!(
        "grant the service account access, e.g. `{}`",
        suggested_command(path, &current_account(), true)
    )
}

#[cfg(not(windows))]
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn display(p: &Path) -> String {
        path::normalize(&p.to_string_lossy())
    }

    #[cfg(unix)]
    fn running_as_root() -> bool {
        // SAFETY: geteuid has no preconditions and cannot fail
        unsafe { libc::geteuid() == 0 }
    }

    #[test]
    fn test_check_accessible_directory() {
        let dir = TempDir::new().unwrap();
        let diagnostics = PermissionDiagnostics::new("media");

        let status = diagnostics.check(&display(dir.path()));
        assert!(status.has_access);
        assert!(!status.can_create);
        assert_eq!(diagnostics.state(&display(dir.path())), ProbeState::Accessible);

        // The probe leaves nothing behind
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_check_missing_path_can_be_created() {
        let dir = TempDir::new().unwrap();
        let missing = display(&dir.path().join("library"));
        let diagnostics = PermissionDiagnostics::new("media");

        let status = diagnostics.check(&missing);
        assert!(!status.has_access);
        assert!(status.can_create);
        assert_eq!(diagnostics.state(&missing), ProbeState::Inaccessible);
    }

    #[cfg(unix)]
    #[test]
    fn test_check_missing_under_system_dir() {
        let status = PermissionDiagnostics::new("media").check("/var/lib/streamvio-missing-probe");
        assert!(!status.has_access);
        assert!(status.can_create);
    }

    #[test]
    fn test_check_file_is_not_accessible() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("movie.mkv");
        fs::write(&file, b"x").unwrap();

        let status = PermissionDiagnostics::new("media").check(&display(&file));
        assert!(!status.has_access);
        assert!(!status.can_create);
    }

    #[test]
    fn test_repair_creates_missing_directory() {
        let dir = TempDir::new().unwrap();
        let missing = display(&dir.path().join("new/library"));
        let diagnostics = PermissionDiagnostics::new("media");

        let result = diagnostics.repair(&missing);
        assert!(result.success);
        assert!(result.suggested_command.is_none());
        assert_eq!(diagnostics.state(&missing), ProbeState::Accessible);

        // Repair does not re-check; a fresh check observes the new state
        assert!(diagnostics.check(&missing).has_access);
    }

    #[cfg(unix)]
    #[test]
    fn test_repair_restores_owner_write_bit() {
        use std::os::unix::fs::PermissionsExt;

        if running_as_root() {
            return;
        }

        let dir = TempDir::new().unwrap();
        let locked = dir.path().join("locked");
        fs::create_dir(&locked).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();

        let diagnostics = PermissionDiagnostics::new("media");
        assert!(!diagnostics.check(&display(&locked)).has_access);

        let result = diagnostics.repair(&display(&locked));
        assert!(result.success, "{:?}", result);
        assert!(diagnostics.check(&display(&locked)).has_access);
    }

    #[cfg(unix)]
    #[test]
    fn test_repair_root_owned_suggests_command() {
        if running_as_root() {
            return;
        }

        let diagnostics = PermissionDiagnostics::new("media");
        let result = diagnostics.repair("/usr/share");

        assert!(!result.success);
        let command = result.suggested_command.unwrap();
        assert!(command.contains("chown"));
        assert!(command.contains("'/usr/share'"));
        assert_eq!(diagnostics.state("/usr/share"), ProbeState::Failed);
    }

    #[cfg(not(windows))]
    #[test]
    fn test_repair_failure_suggests_command_for_path() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("regular file");
        fs::write(&file, b"x").unwrap();
        // A path under a regular file cannot be inspected by anyone
        let target = display(&file.join("sub"));

        let diagnostics = PermissionDiagnostics::new("media");
        let result = diagnostics.repair(&target);

        assert!(!result.success);
        assert!(result.details.is_some());
        let command = result.suggested_command.unwrap();
        assert!(command.contains("chown -R media"));
        assert!(command.contains(&format!("'{}'", target)));
        assert_eq!(diagnostics.state(&target), ProbeState::Failed);
    }

    #[test]
    fn test_tracked_states_are_bounded() {
        let diagnostics = PermissionDiagnostics::new("media");
        for i in 0..MAX_TRACKED_PATHS + 10 {
            diagnostics.set_state(&format!("/srv/{i}"), ProbeState::Accessible);
        }
        // Re-probing moves a path to the back
        diagnostics.set_state("/srv/10", ProbeState::Inaccessible);
        diagnostics.set_state("/srv/new", ProbeState::Accessible);

        let states = diagnostics.states.lock();
        assert_eq!(states.states.len(), MAX_TRACKED_PATHS);
        assert_eq!(states.order.len(), MAX_TRACKED_PATHS);
        drop(states);
        assert_eq!(diagnostics.state("/srv/0"), ProbeState::Unchecked);
        assert_eq!(diagnostics.state("/srv/10"), ProbeState::Inaccessible);
        assert_eq!(diagnostics.state("/srv/new"), ProbeState::Accessible);
    }

    #[cfg(not(windows))]
    #[test]
    fn test_suggested_command_quotes_path() {
        let command = suggested_command("/srv/it's media", "media", true);
        assert!(command.contains("'/srv/it'\\''s media'"));

        let create = suggested_command("/srv/new", "media", false);
        assert!(create.starts_with("sudo mkdir -p '/srv/new'"));
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let status = PermissionStatus {
            has_access: false,
            can_create: true,
            message: "m".to_string(),
            details: None,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["hasAccess"], false);
        assert_eq!(json["canCreate"], true);
        assert!(json.get("details").is_none());
    }
}
