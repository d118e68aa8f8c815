//! The task-dispatch protocol (§5, §6): the driver emits one task at a time
//! and suspends until the host resolves it. Modeled as an async trait rather
//! than the source's event+callback pair — there's exactly one outstanding
//! task at a time, so a plain `async fn` is a faithful, simpler translation.

use crate::error::Result;
use crate::image::Config;
use async_trait::async_trait;
use std::path::PathBuf;

/// A request to extract (a subset of) a tar archive into the container root.
#[derive(Debug, Clone)]
pub struct ExtractTarfileTask {
    pub tarfile: PathBuf,
    pub extract_dir: PathBuf,
    pub strip_dir_count: u32,
    pub rename_to: Option<PathBuf>,
    pub paths: Option<Vec<PathBuf>>,
    pub compression: Option<&'static str>,
}

/// A request to reprovision the container root to match a named base image.
#[derive(Debug, Clone)]
pub struct ImageReprovisionTask {
    pub image_name: String,
    pub cmd_name: &'static str,
}

/// The config/container_config/id the host returns after reprovisioning.
#[derive(Debug, Clone)]
pub struct ReprovisionedImage {
    pub id: String,
    pub parent: Option<String>,
    pub config: Config,
    pub container_config: Config,
}

/// A request to execute a command inside the container root.
#[derive(Debug, Clone)]
pub struct RunTask {
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    pub workdir: String,
    pub user: String,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub exit_code: i64,
}

/// External collaborator fulfilling tasks emitted by the Build Driver. The
/// core never touches the filesystem under `container_root_dir` or talks to
/// a container/zone runtime directly — everything routes through here.
#[async_trait]
pub trait TaskHost: Send + Sync {
    async fn extract_tarfile(&self, task: ExtractTarfileTask) -> Result<()>;
    async fn image_reprovision(&self, task: ImageReprovisionTask) -> Result<ReprovisionedImage>;
    async fn run(&self, task: RunTask) -> Result<RunOutcome>;
}
