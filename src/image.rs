//! The in-memory image-under-construction (§3, §4.4).

use crate::constants::{ARCHITECTURE, BUILTIN_ARGS, OS};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// The canonical Docker image config fields (§3 Config). Unset collection
/// fields must serialize as `null`, not as an empty array/object, so every
/// collection here is `Option`-wrapped.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    #[serde(default, rename = "AttachStdin")]
    pub attach_stdin: bool,
    #[serde(default, rename = "AttachStdout")]
    pub attach_stdout: bool,
    #[serde(default, rename = "AttachStderr")]
    pub attach_stderr: bool,
    #[serde(default, rename = "Cmd")]
    pub cmd: Option<Vec<String>>,
    #[serde(default, rename = "Domainname")]
    pub domainname: String,
    #[serde(default, rename = "Hostname")]
    pub hostname: String,
    #[serde(default, rename = "User")]
    pub user: String,
    #[serde(default, rename = "Entrypoint")]
    pub entrypoint: Option<Vec<String>>,
    #[serde(default, rename = "Env")]
    pub env: Vec<String>,
    #[serde(default, rename = "ExposedPorts")]
    pub exposed_ports: Option<BTreeSet<String>>,
    #[serde(default, rename = "Image")]
    pub image: String,
    #[serde(default, rename = "Labels")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, rename = "OnBuild")]
    pub on_build: Vec<String>,
    #[serde(default, rename = "OpenStdin")]
    pub open_stdin: bool,
    #[serde(default, rename = "StdinOnce")]
    pub stdin_once: bool,
    #[serde(default, rename = "Tty")]
    pub tty: bool,
    #[serde(default, rename = "Volumes")]
    pub volumes: Option<BTreeSet<String>>,
    #[serde(default, rename = "WorkingDir")]
    pub working_dir: String,
    #[serde(default, rename = "StopSignal")]
    pub stop_signal: String,
}

/// Append-only history entry (§3 ImageState.history).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub created: String,
    pub created_by: String,
    pub empty_layer: bool,
}

/// The mutable image being built (§3 ImageState).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageState {
    pub id: Option<String>,
    pub parent: Option<String>,
    pub architecture: String,
    pub os: String,
    pub author: String,
    pub created: String,
    pub config: Config,
    /// Mirror of `config`, but `Cmd` is overwritten per-step with the
    /// synthetic nop command string used for cache lookups (§4.6).
    pub container_config: Config,
    pub history: Vec<HistoryEntry>,
}

impl ImageState {
    /// `FROM scratch`: empty filesystem, null id and parent.
    pub fn scratch() -> Self {
        Self {
            id: None,
            parent: None,
            architecture: ARCHITECTURE.to_string(),
            os: OS.to_string(),
            author: String::new(),
            created: String::new(),
            config: Config::default(),
            container_config: Config::default(),
            history: Vec::new(),
        }
    }

    /// Replace this state with a pulled base image's config (FROM non-scratch).
    pub fn adopt_base(&mut self, id: String, config: Config, container_config: Config) {
        self.id = Some(id.clone());
        self.parent = Some(id);
        self.config = config;
        self.container_config = container_config;
    }

    pub fn short_id(&self) -> Option<String> {
        self.id.as_ref().map(|id| id.chars().take(12).collect())
    }
}

/// Append-only per-instruction record (§3 Layer).
#[derive(Debug, Clone)]
pub struct Layer {
    pub cmd: String,
    pub image: ImageState,
}

/// Declared/supplied build arguments (§3 BuildArgs).
#[derive(Debug, Clone, Default)]
pub struct BuildArgs {
    /// Args declared by `ARG` *and* supplied on the CLI.
    pub consumed: BTreeMap<String, Option<String>>,
    /// All declared args with their default values (or the well-known
    /// proxy args, pre-registered with null values).
    pub effective: BTreeMap<String, Option<String>>,
    /// CLI-supplied build-args not yet matched to a declaring `ARG`.
    pub cli: BTreeMap<String, Option<String>>,
}

impl BuildArgs {
    pub fn new(cli_build_args: BTreeMap<String, Option<String>>) -> Self {
        let mut effective = BTreeMap::new();
        for name in BUILTIN_ARGS {
            effective.insert((*name).to_string(), None);
        }

        Self {
            consumed: BTreeMap::new(),
            effective,
            cli: cli_build_args,
        }
    }

    /// Handle an `ARG name[=default]` declaration: register the default,
    /// and if the CLI supplied a value for `name`, mark it consumed.
    pub fn declare(&mut self, name: &str, default: Option<String>) {
        self.effective.insert(name.to_string(), default.clone());

        if let Some(cli_value) = self.cli.remove(name) {
            self.consumed.insert(name.to_string(), cli_value);
        } else {
            self.consumed
                .entry(name.to_string())
                .or_insert_with(|| default);
        }
    }

    /// Args not consumed by any `ARG` declaration by the end of the build.
    pub fn unconsumed_cli_args(&self) -> Vec<String> {
        self.cli.keys().cloned().collect()
    }

    /// `config.Env` merged with the effective-args map; `config.Env` wins on
    /// key collision (§4.4 "Variable expansion applies").
    pub fn expansion_env(&self, config_env: &[String]) -> Vec<String> {
        let mut env: Vec<String> = Vec::new();
        let mut seen = std::collections::BTreeSet::new();

        for kv in config_env {
            if let Some((k, _)) = kv.split_once('=') {
                seen.insert(k.to_string());
            }
            env.push(kv.clone());
        }

        for (k, v) in &self.effective {
            if !seen.contains(k) {
                env.push(format!("{}={}", k, v.clone().unwrap_or_default()));
            }
        }

        env
    }
}

/// Insert/replace `K=V` in an env list, matching on the `K=` prefix (ENV §4.4).
pub fn set_env(env: &mut Vec<String>, key: &str, value: &str) {
    let prefix = format!("{key}=");
    let entry = format!("{key}={value}");

    if let Some(slot) = env.iter_mut().find(|kv| kv.starts_with(&prefix)) {
        *slot = entry;
    } else {
        env.push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::assert;

    #[test]
    fn set_env_replaces_existing_key() {
        let mut env = vec!["FOO=1".to_string(), "BAR=2".to_string()];
        set_env(&mut env, "FOO", "3");
        assert!(env == vec!["FOO=3".to_string(), "BAR=2".to_string()]);
    }

    #[test]
    fn set_env_appends_new_key() {
        let mut env = vec!["FOO=1".to_string()];
        set_env(&mut env, "BAR", "2");
        assert!(env == vec!["FOO=1".to_string(), "BAR=2".to_string()]);
    }

    #[test]
    fn build_args_track_consumption() {
        let mut cli = BTreeMap::new();
        cli.insert("TOKEN".to_string(), Some("abc".to_string()));
        let mut args = BuildArgs::new(cli);

        args.declare("TOKEN", None);
        assert!(args.unconsumed_cli_args().is_empty());
        assert!(args.consumed.get("TOKEN").unwrap().as_deref() == Some("abc"));
    }

    #[test]
    fn unconsumed_cli_arg_is_reported() {
        let mut cli = BTreeMap::new();
        cli.insert("UNUSED".to_string(), Some("x".to_string()));
        let args = BuildArgs::new(cli);

        assert!(args.unconsumed_cli_args() == vec!["UNUSED".to_string()]);
    }
}
