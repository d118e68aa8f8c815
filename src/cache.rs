//! Cache Engine (§4.6): compute the synthetic "nop" command per step and
//! match it against known images sharing the current parent id.

use crate::image::Config;
use serde::{Deserialize, Serialize};

/// A candidate image the driver may reuse instead of re-running a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedImage {
    pub id: String,
    pub parent: Option<String>,
    pub container_config_cmd: Option<Vec<String>>,
    pub labels: std::collections::BTreeMap<String, String>,
    pub config: Config,
    pub container_config: Config,
}

/// Build the `RUN` nop command: `["|N", "K=V", ..., "/bin/sh", "-c", cmd]`
/// when effective build-args exist, matching Docker's RUN-with-args
/// cache-key format; otherwise just the shell-wrapped command.
pub fn run_nop_cmd(shell_cmd: &[String], effective_args: &std::collections::BTreeMap<String, Option<String>>) -> Vec<String> {
    let mut kvs: Vec<String> = effective_args
        .iter()
        .filter_map(|(k, v)| v.as_ref().map(|v| format!("{k}={v}")))
        .collect();
    kvs.sort();

    if kvs.is_empty() {
        return shell_cmd.to_vec();
    }

    let mut out = Vec::with_capacity(1 + kvs.len() + shell_cmd.len());
    out.push(format!("|{}", kvs.len()));
    out.extend(kvs);
    out.extend_from_slice(shell_cmd);
    out
}

/// `["/bin/sh", "-c", "#(nop) <NAME> <hash> in <dest>"]` for ADD/COPY.
pub fn copy_nop_cmd(name: &str, hash: &str, dest: &str) -> Vec<String> {
    vec![
        "/bin/sh".to_string(),
        "-c".to_string(),
        format!("#(nop) {name} {hash} in {dest}"),
    ]
}

/// `["/bin/sh", "-c", "#(nop) <NAME> [\"arg1\" \"arg2\" ...]"]` for
/// CMD/ENTRYPOINT.
pub fn list_nop_cmd(name: &str, args: &[String]) -> Vec<String> {
    let quoted: Vec<String> = args.iter().map(|a| format!("\"{a}\"")).collect();
    vec![
        "/bin/sh".to_string(),
        "-c".to_string(),
        format!("#(nop) {name} [{}]", quoted.join(" ")),
    ]
}

/// `["/bin/sh", "-c", "#(nop) <NAME> <args-joined>"]` for all other
/// instructions.
pub fn generic_nop_cmd(name: &str, args_joined: &str) -> Vec<String> {
    vec![
        "/bin/sh".to_string(),
        "-c".to_string(),
        format!("#(nop) {name} {args_joined}").trim_end().to_string(),
    ]
}

/// Find the first candidate (by input order) whose `container_config.Image`
/// equals `parent_id`, whose `container_config.Cmd` equals `nop_cmd`, and
/// whose `config.Labels` equal `labels` (§4.6 Lookup).
pub fn find_cached<'a>(
    candidates: &'a [CachedImage],
    parent_id: Option<&str>,
    nop_cmd: &[String],
    labels: &std::collections::BTreeMap<String, String>,
) -> Option<&'a CachedImage> {
    candidates.iter().find(|c| {
        c.parent.as_deref() == parent_id
            && c.container_config_cmd.as_deref() == Some(nop_cmd)
            && c.labels == *labels
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::assert;
    use std::collections::BTreeMap;

    #[test]
    fn run_nop_cmd_without_args_is_bare_shell_cmd() {
        let shell_cmd = vec!["/bin/sh".to_string(), "-c".to_string(), "echo hi".to_string()];
        let args = BTreeMap::new();
        assert!(run_nop_cmd(&shell_cmd, &args) == shell_cmd);
    }

    #[test]
    fn run_nop_cmd_prepends_sorted_args() {
        let shell_cmd = vec!["/bin/sh".to_string(), "-c".to_string(), "echo hi".to_string()];
        let mut args = BTreeMap::new();
        args.insert("B".to_string(), Some("2".to_string()));
        args.insert("A".to_string(), Some("1".to_string()));
        args.insert("C".to_string(), None);

        let nop = run_nop_cmd(&shell_cmd, &args);
        assert!(nop[0] == "|2");
        assert!(nop[1] == "A=1");
        assert!(nop[2] == "B=2");
        assert!(nop[3..] == shell_cmd[..]);
    }

    #[test]
    fn find_cached_matches_parent_cmd_and_labels() {
        let labels = BTreeMap::new();
        let cached = CachedImage {
            id: "abc".to_string(),
            parent: Some("parent1".to_string()),
            container_config_cmd: Some(vec!["a".to_string()]),
            labels: labels.clone(),
            config: Config::default(),
            container_config: Config::default(),
        };

        let found = find_cached(&[cached], Some("parent1"), &["a".to_string()], &labels);
        assert!(found.is_some());

        let not_found = find_cached(&[], Some("parent1"), &["a".to_string()], &labels);
        assert!(not_found.is_none());
    }
}
