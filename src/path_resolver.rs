//! Symlink-safe path resolution rooted at a chroot-like sandbox (§4.1).
//!
//! `resolve_under_root` is the sole defense against context/container escape via
//! symlinks or `..` components; every file-materialization path in the crate
//! (Context Inventory, Copy Pipeline) must route destinations through it.

use crate::error::{Error, Result};
use std::path::{Component, Path, PathBuf};

use crate::constants::MAX_SYMLINK_RESOLUTIONS;

/// Resolve `target` (absolute, or relative to `cwd`) to a real path rooted at
/// `root_dir`, following directory symlinks but never escaping `root_dir`.
///
/// A trailing slash on `target` is preserved on the returned path (it signals
/// directory intent to callers such as the Copy Pipeline).
///
/// Components are walked one raw, un-collapsed token at a time: a literal
/// `..` that would climb above `root_dir` fails the containment check below
/// and aborts with `ForbiddenPath`. The only place `..` is allowed to clamp
/// silently to `root_dir` instead of failing is while re-walking the target
/// of a symlink that was itself found inside the sandbox (§4.1 scopes the
/// clamp to symlink targets specifically).
pub fn resolve_under_root(target: &str, cwd: &str, root_dir: &Path) -> Result<PathBuf> {
    let had_trailing_slash = target.ends_with('/') && target != "/";

    let mut pending: std::collections::VecDeque<(String, bool)> = std::collections::VecDeque::new();
    if !target.starts_with('/') {
        pending.extend(split_components(cwd).into_iter().map(|c| (c, false)));
    }
    pending.extend(split_components(target).into_iter().map(|c| (c, false)));

    let mut resolutions = 0usize;
    let mut current = root_dir.to_path_buf();

    while let Some((component, from_symlink)) = pending.pop_front() {
        if component == ".." {
            let mut candidate = current.clone();
            candidate.pop();

            if assert_contained(root_dir, &candidate).is_err() {
                if from_symlink {
                    continue;
                }
                return Err(Error::ForbiddenPath(format!(
                    "Forbidden path outside the build context: {target}"
                )));
            }

            current = candidate;
            continue;
        }

        let candidate = current.join(&component);
        assert_contained(root_dir, &candidate)?;

        match std::fs::symlink_metadata(&candidate) {
            Ok(meta) if meta.file_type().is_symlink() => {
                resolutions += 1;
                if resolutions > MAX_SYMLINK_RESOLUTIONS {
                    return Err(Error::ForbiddenPath(format!(
                        "too many levels of symbolic links resolving {target}"
                    )));
                }

                let link_target = std::fs::read_link(&candidate)?;
                let link_target = link_target.to_string_lossy().into_owned();

                if link_target.starts_with('/') {
                    // Restart the walk from the root with the link's absolute
                    // target, then continue with whatever components were left.
                    for comp in split_components(&link_target).into_iter().rev() {
                        pending.push_front((comp, true));
                    }
                    current = root_dir.to_path_buf();
                } else {
                    // Relative symlink targets resolve against the link's own
                    // inside-container parent directory, which is exactly
                    // `current` here since the link's own name was never
                    // folded into it.
                    for comp in split_components(&link_target).into_iter().rev() {
                        pending.push_front((comp, true));
                    }
                }
            }
            Ok(_) => {
                current = candidate;
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::NotFound => {
                // The component doesn't exist; the caller may create it
                // later. Append the remaining components unchanged and stop.
                current = candidate;
                for (rest, _) in pending.drain(..) {
                    current = current.join(&rest);
                }
                break;
            }
            Err(e) => return Err(Error::IO(e)),
        }
    }

    let mut result = current;
    if had_trailing_slash && !result.to_string_lossy().ends_with('/') {
        let mut s = result.into_os_string();
        s.push("/");
        result = PathBuf::from(s);
    }

    Ok(result)
}

fn assert_contained(root_dir: &Path, candidate: &Path) -> Result<()> {
    // `candidate` may not exist yet, so compare lexically rather than via
    // `canonicalize` (which requires existence).
    let root = normalize(root_dir);
    let cand = normalize(candidate);

    if cand == root || cand.starts_with(&root) {
        Ok(())
    } else {
        Err(Error::ForbiddenPath(cand.to_string_lossy().into_owned()))
    }
}

fn normalize(p: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in p.components() {
        match comp {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn split_components(path: &str) -> std::collections::VecDeque<String> {
    path.split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::assert;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    #[test]
    fn plain_path_resolves_inside_root() {
        let root = TempDir::new().unwrap();
        let resolved = resolve_under_root("/foo/bar", "/", root.path()).unwrap();
        assert!(resolved == root.path().join("foo/bar"));
    }

    #[test]
    fn literal_dotdot_escape_is_forbidden() {
        let root = TempDir::new().unwrap();
        let err = resolve_under_root("../../etc/passwd", "/", root.path()).unwrap_err();
        match err {
            Error::ForbiddenPath(msg) => {
                assert!(msg.contains("Forbidden path outside the build context"));
            }
            other => panic!("expected ForbiddenPath, got {other:?}"),
        }
    }

    #[test]
    fn literal_dotdot_that_stays_inside_root_is_fine() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("a/b")).unwrap();
        let resolved = resolve_under_root("/a/b/../c", "/", root.path()).unwrap();
        assert!(resolved == root.path().join("a/c"));
    }

    #[test]
    fn symlink_escape_attempt_clamps_to_root() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir(root.path().join("etc")).unwrap();
        symlink("/../../../../..", root.path().join("etc/passwd_link")).unwrap();

        let resolved = resolve_under_root("/etc/passwd_link", "/", root.path()).unwrap();
        assert!(resolved == root.path());
    }

    #[test]
    fn relative_symlink_target_stays_contained() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("a/b")).unwrap();
        symlink("../../../../etc/shadow", root.path().join("a/b/link")).unwrap();

        let resolved = resolve_under_root("/a/b/link", "/", root.path()).unwrap();
        assert!(resolved.starts_with(root.path()));
    }

    #[test]
    fn trailing_slash_is_preserved() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("foo")).unwrap();
        let resolved = resolve_under_root("/foo/", "/", root.path()).unwrap();
        assert!(resolved.to_string_lossy().ends_with('/'));
    }
}
