//! Path resolver (C2): normalize logical paths and resolve relative vs.
//! absolute-to-root references (spec §4.2).

use crate::error::Error;

/// POSIX-style normalization: collapse `.` segments, resolve `..` segments
/// against preceding segments, and preserve whether the input was rooted.
///
/// Does not touch the filesystem — this is pure string manipulation over a
/// logical path.
pub fn normalize(p: &str) -> String {
    let rooted = p.starts_with('/');
    let mut stack: Vec<&str> = Vec::new();

    for segment in p.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                if matches!(stack.last(), Some(&s) if s != "..") {
                    stack.pop();
                } else if !rooted {
                    stack.push("..");
                }
                // Rooted paths silently drop a `..` that would ascend above
                // the root segment list; the OutOfScope check downstream
                // catches anything that still needs rejecting.
            }
            seg => stack.push(seg),
        }
    }

    let joined = stack.join("/");
    if rooted {
        format!("/{}", joined)
    } else {
        joined
    }
}

/// Directory portion of a logical path (everything before the last `/`, or
/// empty for a bare filename).
pub fn dirname(p: &str) -> &str {
    match p.rfind('/') {
        Some(idx) => &p[..idx],
        None => "",
    }
}

/// Resolve `file` relative to the file that referenced it.
///
/// If `file` begins with `/` it is rooted: normalize it and strip all
/// leading slashes (spec invariant 1). Otherwise it is resolved relative to
/// `parent_file`'s directory.
pub fn local_path(parent_file: &str, file: &str) -> Result<String, Error> {
    let resolved = if let Some(rest) = file.strip_prefix('/') {
        normalize(rest).trim_start_matches('/').to_string()
    } else {
        let dir = dirname(parent_file);
        let joined = if dir.is_empty() {
            file.to_string()
        } else {
            format!("{}/{}", dir, file)
        };
        normalize(&joined)
    };

    if resolved.starts_with("../") || resolved == ".." {
        return Err(Error::OutOfScope { path: resolved });
    }

    Ok(resolved)
}
