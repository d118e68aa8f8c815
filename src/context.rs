//! Context Inventory: resolving `ADD`/`COPY` sources against the extracted
//! build context into a tree of [`CopyInfo`] entries, with the hashes used
//! both by the Copy Pipeline and the Cache Engine (§4.3).

use crate::error::{Error, Result};
use crate::path_resolver::resolve_under_root;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// One source-to-destination file/dir pairing for `ADD`/`COPY` (§3 CopyInfo).
#[derive(Debug, Clone)]
pub struct CopyInfo {
    /// Path relative to the context root.
    pub orig_path: PathBuf,
    /// Absolute path inside the container.
    pub dest_path: PathBuf,
    /// True only for `ADD` of a recognized archive.
    pub decompress: bool,
    pub is_dir: bool,
    hash: Option<String>,
    pub children: Vec<CopyInfo>,
}

impl CopyInfo {
    /// `"file:" + sha256(content)`, or `"dir:" + sha256(sorted(child hashes))`,
    /// computed (and memoized) lazily on first access.
    pub fn hash(&mut self, context_root: &Path) -> Result<String> {
        if let Some(h) = &self.hash {
            return Ok(h.clone());
        }

        let h = if self.is_dir {
            let mut child_hashes = Vec::with_capacity(self.children.len());
            for child in &mut self.children {
                child_hashes.push(child.hash(context_root)?);
            }
            child_hashes.sort();
            format!(
                "dir:{}",
                hex::encode(Sha256::digest(child_hashes.join(",").as_bytes()))
            )
        } else {
            let abs = context_root.join(&self.orig_path);
            let content = std::fs::read(&abs)?;
            format!("file:{}", hex::encode(Sha256::digest(&content)))
        };

        self.hash = Some(h.clone());
        Ok(h)
    }
}

/// Composite hash for a step that copies multiple `CopyInfo`s (§4.3).
pub fn composite_hash(infos: &mut [CopyInfo], context_root: &Path) -> Result<String> {
    if infos.len() == 1 {
        return infos[0].hash(context_root);
    }

    let mut hashes = Vec::with_capacity(infos.len());
    for info in infos.iter_mut() {
        hashes.push(info.hash(context_root)?);
    }
    Ok(format!(
        "multi:{}",
        hex::encode(Sha256::digest(hashes.join(",").as_bytes()))
    ))
}

const ARCHIVE_EXTENSIONS: &[&str] = &[".tar", ".tar.gz", ".tgz", ".tar.bz2", ".tar.xz"];

/// Compression/container detection for `ADD` auto-extraction (§4.5):
/// `.tar`-by-extension, or magic bytes for gzip/bzip2/xz.
pub fn detect_archive(path: &Path) -> Result<Option<&'static str>> {
    let name = path.to_string_lossy().to_lowercase();
    if ARCHIVE_EXTENSIONS.iter().any(|ext| name.ends_with(ext)) {
        return Ok(Some(archive_kind_from_name(&name)));
    }

    let mut buf = [0u8; 6];
    let bytes_read = {
        use std::io::Read;
        let mut f = std::fs::File::open(path)?;
        f.read(&mut buf)?
    };
    let buf = &buf[..bytes_read];

    if buf.starts_with(&[0x1f, 0x8b]) {
        Ok(Some("gzip"))
    } else if buf.starts_with(b"BZh") {
        Ok(Some("bzip2"))
    } else if buf.starts_with(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]) {
        Ok(Some("xz"))
    } else {
        Ok(None)
    }
}

fn archive_kind_from_name(name: &str) -> &'static str {
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        "gzip"
    } else if name.ends_with(".tar.bz2") {
        "bzip2"
    } else if name.ends_with(".tar.xz") {
        "xz"
    } else {
        "none"
    }
}

fn has_wildcard(pattern: &str) -> bool {
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            chars.next();
            continue;
        }
        if matches!(c, '*' | '?' | '[') {
            return true;
        }
    }
    false
}

fn strip_source_prefix(src: &str) -> &str {
    let src = src.strip_prefix('/').unwrap_or(src);
    src.strip_prefix("./").unwrap_or(src)
}

/// `getCopyInfo(cmd, opts)` (§4.3): resolve all sources of an `ADD`/`COPY`
/// instruction (`args = [src1..srcN, dest]`) into a flat list of `CopyInfo`.
pub fn get_copy_info(
    args: &[String],
    context_root: &Path,
    working_dir: &str,
    allow_remote: bool,
) -> Result<Vec<CopyInfo>> {
    if args.len() < 2 {
        return Err(Error::InputError(
            "ADD/COPY requires at least a source and a destination".to_string(),
        ));
    }

    let (sources, dest) = args.split_at(args.len() - 1);
    let dest = &dest[0];

    let dest_abs = if dest.starts_with('/') {
        dest.clone()
    } else {
        format!("{}/{}", working_dir.trim_end_matches('/'), dest)
    };

    let mut results = Vec::new();

    for src in sources {
        let stripped = strip_source_prefix(src);

        if allow_remote && looks_like_remote_url(stripped) {
            return Err(Error::NotImplemented(format!(
                "remote URL sources are not supported: {src}"
            )));
        }

        if has_wildcard(stripped) {
            results.extend(expand_wildcard(stripped, context_root)?);
        } else {
            results.push(single_source(stripped, context_root)?);
        }
    }

    if results.is_empty() {
        return Err(Error::InputError(
            "No source files were specified".to_string(),
        ));
    }

    if results.len() > 1 && !dest.ends_with('/') {
        return Err(Error::InputError(
            "When using multiple sources for COPY/ADD, the destination must be a directory and end with '/'"
                .to_string(),
        ));
    }

    let dest_base = dest_abs.trim_end_matches('/').to_string();
    for info in &mut results {
        assign_dest_path(info, &dest_base, dest.ends_with('/') || results.len() > 1);
    }

    Ok(results)
}

fn looks_like_remote_url(s: &str) -> bool {
    matches!(
        s.split("://").next(),
        Some(scheme) if scheme != s && (scheme == "http" || scheme == "https")
    )
}

fn assign_dest_path(info: &mut CopyInfo, dest_base: &str, dest_is_dir: bool) {
    let basename = info
        .orig_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    info.dest_path = if dest_is_dir {
        PathBuf::from(format!("{dest_base}/{basename}"))
    } else {
        PathBuf::from(dest_base)
    };

    for child in &mut info.children {
        let child_base = info.dest_path.to_string_lossy().into_owned();
        assign_child_dest(child, &child_base);
    }
}

fn assign_child_dest(info: &mut CopyInfo, parent_dest: &str) {
    let basename = info
        .orig_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    info.dest_path = PathBuf::from(format!("{parent_dest}/{basename}"));

    for child in &mut info.children {
        let child_base = info.dest_path.to_string_lossy().into_owned();
        assign_child_dest(child, &child_base);
    }
}

fn single_source(orig: &str, context_root: &Path) -> Result<CopyInfo> {
    let real = resolve_under_root(orig, "/", context_root)?;
    if !real.exists() {
        return Err(Error::NotFound(orig.to_string()));
    }

    build_copy_info(PathBuf::from(orig), &real)
}

fn build_copy_info(orig_path: PathBuf, real: &Path) -> Result<CopyInfo> {
    let meta = std::fs::symlink_metadata(real)?;

    if meta.is_dir() {
        let mut children = Vec::new();
        let mut entries: Vec<_> = std::fs::read_dir(real)?.collect::<std::io::Result<_>>()?;
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let child_orig = orig_path.join(entry.file_name());
            children.push(build_copy_info(child_orig, &entry.path())?);
        }

        Ok(CopyInfo {
            orig_path,
            dest_path: PathBuf::new(),
            decompress: false,
            is_dir: true,
            hash: None,
            children,
        })
    } else {
        Ok(CopyInfo {
            orig_path,
            dest_path: PathBuf::new(),
            decompress: false,
            is_dir: false,
            hash: None,
            children: Vec::new(),
        })
    }
}

/// Walk the extracted-context directory level by level, matching each
/// pattern component as a glob; only the last component may match a file
/// (§4.3 "Wildcard expansion").
fn expand_wildcard(pattern: &str, context_root: &Path) -> Result<Vec<CopyInfo>> {
    let components: Vec<&str> = pattern.split('/').filter(|c| !c.is_empty()).collect();
    if components.is_empty() {
        return Err(Error::NotFound(pattern.to_string()));
    }

    let mut frontier: Vec<PathBuf> = vec![PathBuf::new()];

    for (i, comp) in components.iter().enumerate() {
        let is_last = i == components.len() - 1;
        let glob_pat = glob::Pattern::new(comp)
            .map_err(|e| Error::InputError(format!("invalid wildcard pattern '{comp}': {e}")))?;

        let mut next = Vec::new();
        for base in &frontier {
            let real_base = resolve_under_root(
                &format!("/{}", base.to_string_lossy()),
                "/",
                context_root,
            )?;
            let entries = match std::fs::read_dir(&real_base) {
                Ok(e) => e,
                Err(_) => continue,
            };

            for entry in entries {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if !glob_pat.matches(&name) {
                    continue;
                }

                let is_dir_entry = entry.file_type()?.is_dir();
                if !is_last && !is_dir_entry {
                    continue;
                }

                next.push(base.join(&name));
            }
        }
        frontier = next;
    }

    let mut results = Vec::new();
    for rel in frontier {
        let real = resolve_under_root(&format!("/{}", rel.to_string_lossy()), "/", context_root)?;
        results.push(build_copy_info(rel, &real)?);
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::assert;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let p = root.join(rel);
        std::fs::create_dir_all(p.parent().unwrap()).unwrap();
        std::fs::write(p, content).unwrap();
    }

    #[test]
    fn single_file_hash_is_stable() {
        let root = TempDir::new().unwrap();
        write(root.path(), "hello.txt", b"hi there");

        let mut infos =
            get_copy_info(&["hello.txt".into(), "/".into()], root.path(), "/", false).unwrap();
        let h1 = infos[0].hash(root.path()).unwrap();

        let mut infos2 =
            get_copy_info(&["hello.txt".into(), "/".into()], root.path(), "/", false).unwrap();
        let h2 = infos2[0].hash(root.path()).unwrap();

        assert!(h1 == h2);
        assert!(h1.starts_with("file:"));
    }

    #[test]
    fn hash_changes_when_content_changes() {
        let root = TempDir::new().unwrap();
        write(root.path(), "hello.txt", b"version 1");
        let mut infos =
            get_copy_info(&["hello.txt".into(), "/".into()], root.path(), "/", false).unwrap();
        let h1 = infos[0].hash(root.path()).unwrap();

        write(root.path(), "hello.txt", b"version 2");
        let mut infos2 =
            get_copy_info(&["hello.txt".into(), "/".into()], root.path(), "/", false).unwrap();
        let h2 = infos2[0].hash(root.path()).unwrap();

        assert!(h1 != h2);
    }

    #[test]
    fn directory_hash_is_sorted_join_of_children() {
        let root = TempDir::new().unwrap();
        write(root.path(), "dir/a.txt", b"a");
        write(root.path(), "dir/b.txt", b"b");

        let mut infos =
            get_copy_info(&["dir".into(), "/dst/".into()], root.path(), "/", false).unwrap();
        let h = infos[0].hash(root.path()).unwrap();
        assert!(h.starts_with("dir:"));
    }

    #[test]
    fn missing_source_is_not_found() {
        let root = TempDir::new().unwrap();
        let err = get_copy_info(&["nope.txt".into(), "/".into()], root.path(), "/", false)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn multiple_sources_require_directory_dest() {
        let root = TempDir::new().unwrap();
        write(root.path(), "a.txt", b"a");
        write(root.path(), "b.txt", b"b");

        let err = get_copy_info(
            &["a.txt".into(), "b.txt".into(), "/dst".into()],
            root.path(),
            "/",
            false,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InputError(_)));
    }

    #[test]
    fn wildcard_matches_files_in_directory() {
        let root = TempDir::new().unwrap();
        write(root.path(), "src/a.txt", b"a");
        write(root.path(), "src/b.txt", b"b");
        write(root.path(), "src/c.log", b"c");

        let infos = get_copy_info(
            &["src/*.txt".into(), "/dst/".into()],
            root.path(),
            "/",
            false,
        )
        .unwrap();
        assert!(infos.len() == 2);
    }
}
