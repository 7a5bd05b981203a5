//! Path string utilities
//!
//! Everything here works on plain strings and never touches the file system.
//! Paths are handled in a single canonical spelling: forward slashes, no
//! repeated separators, no trailing separator except for a bare root.
//! `..` is left alone; resolving it is the OS's job when the path is used.

/// Normalize separators in a path string
pub fn normalize(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut prev_slash = false;

    for c in path.chars() {
        let c = if c == '\\' { '/' } else { c };
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(c);
    }

    if out.ends_with('/') && out != "/" && !is_drive_root(&out) {
        out.pop();
    }

    out
}

/// Split a path into its non-empty segments
pub fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Parent of a path, or an empty string for root-level locations
///
/// `parent_of("/media/movies")` is `"/media"`, while both `parent_of("/media")`
/// and `parent_of("")` are `""`. A drive's parent keeps its root slash:
/// `parent_of("C:/x")` is `"C:/"`.
pub fn parent_of(path: &str) -> String {
    let normalized = normalize(path);
    let segs = segments(&normalized);

    if segs.len() < 2 {
        return String::new();
    }

    let kept = segs[..segs.len() - 1].join("/");
    if is_drive(segs[0]) {
        if segs.len() == 2 {
            // "C:" alone is drive-relative
            format!("{}/", kept)
        } else {
            kept
        }
    } else {
        format!("/{}", kept)
    }
}

/// Join a child name onto a base path
pub fn join(base: &str, name: &str) -> String {
    if base.is_empty() {
        return normalize(name);
    }
    normalize(&format!("{}/{}", base, name))
}

/// Last segment of a path
pub fn file_name(path: &str) -> Option<&str> {
    path.split(|c| c == '/' || c == '\\').filter(|s| !s.is_empty()).last()
}

/// Check whether a path string is absolute (`/...` or `X:/...`)
pub fn is_absolute(path: &str) -> bool {
    if path.starts_with('/') || path.starts_with('\\') {
        return true;
    }

    let bytes = path.as_bytes();
    bytes.len() >= 2
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes.len() == 2 || bytes[2] == b'/' || bytes[2] == b'\\')
}

fn is_drive(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn is_drive_root(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() == 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && bytes[2] == b'/'
}
