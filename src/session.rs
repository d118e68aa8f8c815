//! `BuildSession`: construction options and observable events (§3, §6).

use crate::cache::CachedImage;
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandType {
    Build,
    Commit,
}

/// Owns one build run (§3 BuildSession). Created by the caller, lives for
/// one build, destroyed at the end.
pub struct BuildSession {
    pub work_dir: PathBuf,
    pub container_root_dir: PathBuf,
    pub context_archive_path: Option<PathBuf>,
    pub dockerfile_name: String,
    pub cli_build_args: BTreeMap<String, Option<String>>,
    pub cli_labels: BTreeMap<String, String>,
    pub cache_enabled: bool,
    pub suppress_success_msg: bool,
    pub existing_images: Vec<CachedImage>,
    pub command_type: CommandType,
    pub chown_uid: u32,
    pub chown_gid: u32,
    pub zone_id: Option<String>,
    /// Commit mode only (§4.7): the base image to reprovision onto before
    /// applying `commit_instructions`. `None` starts from scratch.
    pub commit_base_image: Option<String>,
    /// Commit mode only: raw instruction lines to apply, in place of reading
    /// a Dockerfile out of the (unextracted) context.
    pub commit_instructions: Vec<String>,
}

impl BuildSession {
    pub fn builder(work_dir: PathBuf, container_root_dir: PathBuf) -> BuildSessionBuilder {
        BuildSessionBuilder {
            work_dir,
            container_root_dir,
            context_archive_path: None,
            dockerfile_name: crate::constants::DEFAULT_DOCKERFILE_NAME.to_string(),
            cli_build_args: BTreeMap::new(),
            cli_labels: BTreeMap::new(),
            cache_enabled: true,
            suppress_success_msg: false,
            existing_images: Vec::new(),
            command_type: CommandType::Build,
            chown_uid: 0,
            chown_gid: 0,
            zone_id: None,
            commit_base_image: None,
            commit_instructions: Vec::new(),
        }
    }
}

/// Named-options constructor for [`BuildSession`] (§6 "Session construction
/// options").
pub struct BuildSessionBuilder {
    work_dir: PathBuf,
    container_root_dir: PathBuf,
    context_archive_path: Option<PathBuf>,
    dockerfile_name: String,
    cli_build_args: BTreeMap<String, Option<String>>,
    cli_labels: BTreeMap<String, String>,
    cache_enabled: bool,
    suppress_success_msg: bool,
    existing_images: Vec<CachedImage>,
    command_type: CommandType,
    chown_uid: u32,
    chown_gid: u32,
    zone_id: Option<String>,
    commit_base_image: Option<String>,
    commit_instructions: Vec<String>,
}

impl BuildSessionBuilder {
    pub fn context_filepath(mut self, p: PathBuf) -> Self {
        self.context_archive_path = Some(p);
        self
    }

    pub fn dockerfile(mut self, name: impl Into<String>) -> Self {
        self.dockerfile_name = name.into();
        self
    }

    pub fn buildargs(mut self, args: BTreeMap<String, Option<String>>) -> Self {
        self.cli_build_args = args;
        self
    }

    pub fn labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.cli_labels = labels;
        self
    }

    pub fn nocache(mut self, nocache: bool) -> Self {
        self.cache_enabled = !nocache;
        self
    }

    pub fn suppress_success_msg(mut self, suppress: bool) -> Self {
        self.suppress_success_msg = suppress;
        self
    }

    pub fn existing_images(mut self, images: Vec<CachedImage>) -> Self {
        self.existing_images = images;
        self
    }

    pub fn command_type(mut self, t: CommandType) -> Self {
        self.command_type = t;
        self
    }

    pub fn chown(mut self, uid: u32, gid: u32) -> Self {
        self.chown_uid = uid;
        self.chown_gid = gid;
        self
    }

    pub fn zone_id(mut self, id: impl Into<String>) -> Self {
        self.zone_id = Some(id.into());
        self
    }

    /// Commit mode only (§4.7): the base image to reprovision onto before
    /// the first instruction. Leave unset to start from scratch.
    pub fn commit_base_image(mut self, image: impl Into<String>) -> Self {
        self.commit_base_image = Some(image.into());
        self
    }

    /// Commit mode only: the raw instruction lines to apply.
    pub fn commit_instructions(mut self, lines: Vec<String>) -> Self {
        self.commit_instructions = lines;
        self
    }

    pub fn build(self) -> BuildSession {
        BuildSession {
            work_dir: self.work_dir,
            container_root_dir: self.container_root_dir,
            context_archive_path: self.context_archive_path,
            dockerfile_name: self.dockerfile_name,
            cli_build_args: self.cli_build_args,
            cli_labels: self.cli_labels,
            cache_enabled: self.cache_enabled,
            suppress_success_msg: self.suppress_success_msg,
            existing_images: self.existing_images,
            command_type: self.command_type,
            chown_uid: self.chown_uid,
            chown_gid: self.chown_gid,
            zone_id: self.zone_id,
            commit_base_image: self.commit_base_image,
            commit_instructions: self.commit_instructions,
        }
    }
}

/// Observable events emitted over the course of a build (§6).
#[derive(Debug, Clone)]
pub enum BuildEvent {
    /// Human-readable build progress; a compatibility surface.
    Message(String),
    /// The core has finished applying a reprovision result; the host may
    /// resume file operations.
    ImageReprovisioned,
    /// Terminal event: `Ok(final_short_id)` or `Err(message)`.
    End(std::result::Result<String, String>),
}
