//! A [`TaskHost`] backed by the real filesystem and, for `RUN`, a forked
//! `chroot` child. Image lookups go against a flat on-disk store
//! (`<store_root>/<repo>/<tag>/{config.json,rootfs/}`) rather than a real
//! registry — there's no daemon here to pull from, so a base image has to
//! already be unpacked into the store before a build can `FROM` it.

use crate::error::{Error, Result};
use crate::image::Config;
use crate::tasks::{
    ExtractTarfileTask, ImageReprovisionTask, ReprovisionedImage, RunOutcome, RunTask, TaskHost,
};
use async_compression::tokio::bufread::{BzDecoder, GzipDecoder, XzDecoder};
use async_trait::async_trait;
use futures_util::stream::StreamExt;
use serde::{Deserialize, Serialize};
use std::ffi::CString;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use tokio::io::{AsyncRead, BufReader};

pub struct LocalHost {
    store_root: PathBuf,
    container_root: PathBuf,
}

impl LocalHost {
    pub fn new(store_root: PathBuf, container_root: PathBuf) -> Self {
        Self {
            store_root,
            container_root,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredImage {
    id: String,
    parent: Option<String>,
    config: Config,
    container_config: Config,
}

fn split_image_ref(image_name: &str) -> (String, String) {
    match image_name.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') && !tag.is_empty() => {
            (repo.to_string(), tag.to_string())
        }
        _ => (image_name.to_string(), "latest".to_string()),
    }
}

#[async_trait]
impl TaskHost for LocalHost {
    async fn extract_tarfile(&self, task: ExtractTarfileTask) -> Result<()> {
        tokio::fs::create_dir_all(&task.extract_dir).await?;

        let file = tokio::fs::File::open(&task.tarfile).await?;
        let reader = BufReader::new(file);
        let reader: Pin<Box<dyn AsyncRead + Send>> = match task.compression {
            Some("gzip") => Box::pin(GzipDecoder::new(reader)),
            Some("bzip2") => Box::pin(BzDecoder::new(reader)),
            Some("xz") => Box::pin(XzDecoder::new(reader)),
            _ => Box::pin(reader),
        };

        let mut archive = tokio_tar::Archive::new(reader);
        let mut entries = archive.entries()?;

        while let Some(entry) = entries.next().await {
            let mut entry = entry?;
            let entry_path = entry.path()?.into_owned();

            if let Some(allowed) = &task.paths {
                if !allowed.iter().any(|p| entry_path.starts_with(p)) {
                    continue;
                }
            }

            let Some(rel) = remap_entry_path(
                &entry_path,
                task.strip_dir_count,
                task.rename_to.as_deref(),
            ) else {
                continue;
            };

            let dest = crate::path_resolver::resolve_under_root(
                &format!("/{}", rel.to_string_lossy()),
                "/",
                &task.extract_dir,
            )?;

            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            entry.unpack(&dest).await?;
        }

        Ok(())
    }

    async fn image_reprovision(&self, task: ImageReprovisionTask) -> Result<ReprovisionedImage> {
        let (repo, tag) = split_image_ref(&task.image_name);
        let image_dir = self.store_root.join(&repo).join(&tag);

        let config_bytes = tokio::fs::read(image_dir.join("config.json"))
            .await
            .map_err(|_| Error::NotFound(task.image_name.clone()))?;
        let stored: StoredImage = serde_json::from_slice(&config_bytes)?;

        reprovision_container_root(&image_dir.join("rootfs"), &self.container_root).await?;

        Ok(ReprovisionedImage {
            id: stored.id,
            parent: stored.parent,
            config: stored.config,
            container_config: stored.container_config,
        })
    }

    async fn run(&self, task: RunTask) -> Result<RunOutcome> {
        let container_root = self.container_root.clone();
        let exit_code = tokio::task::spawn_blocking(move || run_in_chroot(&container_root, &task))
            .await
            .map_err(|e| Error::TaskFailure(e.to_string()))??;
        Ok(RunOutcome { exit_code })
    }
}

/// Strip `strip_dir_count` leading path components from a tar entry's path,
/// then (if set) replace what remains of the first component with
/// `rename_to`. Returns `None` when stripping consumes the whole path (§4.5
/// "strip components").
fn remap_entry_path(
    entry_path: &Path,
    strip_dir_count: u32,
    rename_to: Option<&Path>,
) -> Option<PathBuf> {
    let comps: Vec<Component> = entry_path.components().collect();
    let skip = (strip_dir_count as usize).min(comps.len());
    let remainder = &comps[skip..];
    if remainder.is_empty() {
        return None;
    }

    let mut parts: Vec<std::ffi::OsString> =
        remainder.iter().map(|c| c.as_os_str().to_os_string()).collect();
    if let Some(rename) = rename_to {
        parts[0] = rename.as_os_str().to_os_string();
    }

    Some(parts.iter().collect())
}

async fn reprovision_container_root(rootfs: &Path, container_root: &Path) -> Result<()> {
    let rootfs = rootfs.to_path_buf();
    let container_root = container_root.to_path_buf();

    tokio::task::spawn_blocking(move || -> Result<()> {
        if container_root.exists() {
            std::fs::remove_dir_all(&container_root)?;
        }
        std::fs::create_dir_all(&container_root)?;
        copy_tree(&rootfs, &container_root)
    })
    .await
    .map_err(|e| Error::TaskFailure(e.to_string()))??;

    Ok(())
}

fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let dst_path = dst.join(entry.file_name());

        if file_type.is_dir() {
            std::fs::create_dir_all(&dst_path)?;
            copy_tree(&entry.path(), &dst_path)?;
        } else if file_type.is_symlink() {
            let target = std::fs::read_link(entry.path())?;
            #[cfg(unix)]
            std::os::unix::fs::symlink(&target, &dst_path)?;
        } else {
            std::fs::copy(entry.path(), &dst_path)?;
        }
    }

    Ok(())
}

fn run_in_chroot(container_root: &Path, task: &RunTask) -> Result<i64> {
    use nix::sys::wait::{waitpid, WaitStatus};
    use nix::unistd::{fork, ForkResult};

    match fork().map_err(|e| Error::TaskFailure(e.to_string()))? {
        ForkResult::Child => {
            let err = exec_in_chroot(container_root, task);
            eprintln!("imagesmith: {err}");
            std::process::exit(127);
        }
        ForkResult::Parent { child } => {
            match waitpid(child, None).map_err(|e| Error::TaskFailure(e.to_string()))? {
                WaitStatus::Exited(_, code) => Ok(code as i64),
                WaitStatus::Signaled(_, sig, _) => Ok(128 + sig as i64),
                other => Err(Error::TaskFailure(format!(
                    "unexpected wait status: {other:?}"
                ))),
            }
        }
    }
}

/// Runs in the forked child: chroot, drop to the requested user, then
/// `execve`. Only returns on failure — a successful `execve` replaces the
/// process image and never comes back here.
fn exec_in_chroot(container_root: &Path, task: &RunTask) -> Error {
    if let Err(e) = nix::unistd::chroot(container_root) {
        return Error::TaskFailure(format!("chroot: {e}"));
    }
    if let Err(e) = nix::unistd::chdir(task.workdir.as_str()) {
        return Error::TaskFailure(format!("chdir {}: {e}", task.workdir));
    }
    if let Err(e) = apply_user(&task.user) {
        return e;
    }

    let cmd: Result<Vec<CString>> = task
        .cmd
        .iter()
        .map(|a| CString::new(a.as_str()).map_err(|e| Error::TaskFailure(e.to_string())))
        .collect();
    let env: Result<Vec<CString>> = task
        .env
        .iter()
        .map(|a| CString::new(a.as_str()).map_err(|e| Error::TaskFailure(e.to_string())))
        .collect();

    let (cmd, env) = match (cmd, env) {
        (Ok(cmd), Ok(env)) => (cmd, env),
        (Err(e), _) | (_, Err(e)) => return e,
    };
    if cmd.is_empty() {
        return Error::TaskFailure("RUN with an empty command".to_string());
    }

    match nix::unistd::execve(&cmd[0], &cmd, &env) {
        Ok(_) => unreachable!("execve returned Ok"),
        Err(e) => Error::TaskFailure(format!("exec {}: {e}", task.cmd.join(" "))),
    }
}

fn apply_user(user: &str) -> Result<()> {
    if user.is_empty() {
        return Ok(());
    }

    let (user_part, group_part) = match user.split_once(':') {
        Some((u, g)) => (u, Some(g)),
        None => (user, None),
    };

    let uid = resolve_uid(user_part)?;
    let gid = match group_part {
        Some(g) => resolve_gid(g)?,
        None => nix::unistd::User::from_uid(uid)
            .map_err(|e| Error::TaskFailure(e.to_string()))?
            .map(|u| u.gid)
            .unwrap_or_else(|| nix::unistd::Gid::from_raw(uid.as_raw())),
    };

    nix::unistd::setgid(gid).map_err(|e| Error::TaskFailure(e.to_string()))?;
    nix::unistd::setuid(uid).map_err(|e| Error::TaskFailure(e.to_string()))?;
    Ok(())
}

fn resolve_uid(s: &str) -> Result<nix::unistd::Uid> {
    if let Ok(n) = s.parse::<u32>() {
        return Ok(nix::unistd::Uid::from_raw(n));
    }
    nix::unistd::User::from_name(s)
        .map_err(|e| Error::TaskFailure(e.to_string()))?
        .map(|u| u.uid)
        .ok_or_else(|| Error::NotFound(s.to_string()))
}

fn resolve_gid(s: &str) -> Result<nix::unistd::Gid> {
    if let Ok(n) = s.parse::<u32>() {
        return Ok(nix::unistd::Gid::from_raw(n));
    }
    nix::unistd::Group::from_name(s)
        .map_err(|e| Error::TaskFailure(e.to_string()))?
        .map(|g| g.gid)
        .ok_or_else(|| Error::NotFound(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::assert;

    #[test]
    fn split_image_ref_with_tag() {
        assert!(split_image_ref("alpine:3.19") == ("alpine".to_string(), "3.19".to_string()));
    }

    #[test]
    fn split_image_ref_without_tag_defaults_to_latest() {
        assert!(split_image_ref("alpine") == ("alpine".to_string(), "latest".to_string()));
    }

    #[test]
    fn split_image_ref_with_registry_port_is_not_mistaken_for_a_tag() {
        assert!(
            split_image_ref("myregistry:5000/app")
                == ("myregistry:5000/app".to_string(), "latest".to_string())
        );
    }

    #[test]
    fn remap_entry_path_strips_and_renames() {
        let p = PathBuf::from("a/b/c.txt");
        let remapped = remap_entry_path(&p, 1, Some(Path::new("renamed"))).unwrap();
        assert!(remapped == PathBuf::from("renamed/c.txt"));
    }

    #[test]
    fn remap_entry_path_returns_none_when_fully_stripped() {
        let p = PathBuf::from("a");
        assert!(remap_entry_path(&p, 5, None).is_none());
    }
}
