//! Per-instruction pre-hook/main-hook handlers (§4.4) and the Copy Pipeline
//! (§4.5). [`prepare`] performs argument normalization and variable
//! expansion (the pre-hook); [`apply`] performs the effect (the main-hook).
//! Splitting the two lets the Build Driver compute a step's nop command
//! (§4.6) from `prepare`'s output before deciding whether to run `apply` at
//! all.

use crate::cache;
use crate::context::{self, CopyInfo};
use crate::dockerfile::parser;
use crate::dockerfile::Instruction;
use crate::error::{Error, Result};
use crate::image::{set_env, BuildArgs, ImageState};
use crate::path_resolver::resolve_under_root;
use crate::shell_word;
use crate::tasks::{
    ExtractTarfileTask, ImageReprovisionTask, RunTask, TaskHost,
};
use std::path::{Path, PathBuf};

/// Filesystem locations the dispatcher needs but doesn't own.
pub struct StepPaths<'a> {
    pub context_root: &'a Path,
    pub context_archive_path: &'a Path,
    pub container_root: &'a Path,
    pub chown_uid: u32,
    pub chown_gid: u32,
}

/// The pre-hook's normalized output: enough to compute a cache key and,
/// separately, to run the main-hook.
pub struct Prepared {
    pub kind: PreparedKind,
    pub args_joined: String,
}

pub enum PreparedKind {
    From { image_name: String },
    Arg { name: String, default: Option<String> },
    Maintainer { author: String },
    Label { pairs: Vec<(String, String)> },
    Env { pairs: Vec<(String, String)> },
    Expose { ports: Vec<String> },
    Volume { vols: Vec<String> },
    User { user: String },
    Workdir { dir: String },
    Cmd { cmd: Vec<String> },
    Entrypoint { cmd: Vec<String> },
    StopSignal { sig: String },
    Onbuild { raw_line: String },
    Copy {
        infos: Vec<CopyInfo>,
        dest: String,
        instr_name: &'static str,
        hash: String,
    },
    Run { cmd: Vec<String> },
}

/// Outcome of the main-hook, fed back into the Build Driver.
#[derive(Default)]
pub struct StepOutcome {
    pub reprovisioned: bool,
    pub onbuild_triggers: Vec<String>,
}

/// Pre-hook (§4.4): normalize arguments and, where applicable, expand
/// `$VAR`/`${VAR}` against `config.Env ∪ effective-args` (§4.4 "Variable
/// expansion applies").
pub fn prepare(
    instr: &Instruction,
    image: &ImageState,
    build_args: &BuildArgs,
    paths: &StepPaths,
) -> Result<Prepared> {
    let env = build_args.expansion_env(&image.config.env);
    let raw_args = instr.args_str();

    // ONBUILD's own args are never expanded at declare time: the embedded
    // instruction is re-parsed and expanded later, against the downstream
    // build's env, when the trigger replays (§4.4 "ONBUILD (recursively)").
    let do_expand = instr.expands_args() && !matches!(instr, Instruction::Onbuild { .. });
    let tokens = if do_expand {
        expand_tokens(raw_args, &env)?
    } else {
        parser::split_words(raw_args)?
    };
    let args_joined = tokens.join(" ");

    let kind = match instr {
        Instruction::From { .. } => PreparedKind::From {
            image_name: raw_args.trim().to_string(),
        },
        Instruction::Arg { .. } => {
            let decl = tokens.first().ok_or_else(|| {
                Error::InputError("ARG requires a name".to_string())
            })?;
            let (name, default) = match decl.split_once('=') {
                Some((n, v)) => (n.to_string(), Some(v.to_string())),
                None => (decl.clone(), None),
            };
            PreparedKind::Arg { name, default }
        }
        Instruction::Maintainer { .. } => PreparedKind::Maintainer {
            author: raw_args.trim().to_string(),
        },
        Instruction::Label { .. } => PreparedKind::Label {
            pairs: parse_kv_pairs(&tokens, "LABEL")?,
        },
        Instruction::Env { .. } => {
            let pairs = match parse_kv_pairs(&tokens, "ENV") {
                Ok(p) => p,
                // §9 open question (ii): a bad `${NAME:...}` modifier inside an
                // ENV value must not abort the build; the literal text survives.
                Err(Error::BadShellSubstitution(_)) => {
                    let raw_tokens = parser::split_words(raw_args)?;
                    parse_kv_pairs(&raw_tokens, "ENV")?
                }
                Err(e) => return Err(e),
            };
            PreparedKind::Env { pairs }
        }
        Instruction::Expose { .. } => PreparedKind::Expose {
            ports: expand_port_ranges(&tokens)?,
        },
        Instruction::Volume { .. } => {
            if tokens.is_empty() || tokens.iter().any(|t| t.is_empty()) {
                return Err(Error::InputError(
                    "VOLUME requires at least one non-empty path".to_string(),
                ));
            }
            PreparedKind::Volume { vols: tokens.clone() }
        }
        Instruction::User { .. } => PreparedKind::User {
            user: args_joined.clone(),
        },
        Instruction::Workdir { .. } => PreparedKind::Workdir {
            dir: normalize_workdir(&image.config.working_dir, &args_joined),
        },
        Instruction::Cmd { .. } => PreparedKind::Cmd {
            cmd: shell_wrap(raw_args),
        },
        Instruction::Entrypoint { .. } => PreparedKind::Entrypoint {
            cmd: shell_wrap(raw_args),
        },
        Instruction::StopSignal { .. } => PreparedKind::StopSignal {
            sig: args_joined.clone(),
        },
        Instruction::Onbuild { .. } => {
            let inner = parser::parse(raw_args)?;
            let inner = inner.first().ok_or_else(|| {
                Error::InputError("ONBUILD requires an instruction".to_string())
            })?;
            if matches!(inner.name.as_str(), "ONBUILD" | "FROM" | "MAINTAINER") {
                return Err(Error::InputError(format!(
                    "{} is not allowed as an ONBUILD trigger",
                    inner.name
                )));
            }
            PreparedKind::Onbuild {
                raw_line: raw_args.trim().to_string(),
            }
        }
        Instruction::Copy { .. } | Instruction::Add { .. } => {
            let name = instr.name();
            let infos = context::get_copy_info(
                &tokens,
                paths.context_root,
                &image.config.working_dir,
                name == "ADD",
            )?;
            let mut infos = infos;
            let hash = context::composite_hash(&mut infos, paths.context_root)?;
            let dest = tokens.last().cloned().unwrap_or_default();
            PreparedKind::Copy {
                infos,
                dest,
                instr_name: name,
                hash,
            }
        }
        Instruction::Run { .. } => PreparedKind::Run {
            cmd: shell_wrap(raw_args),
        },
    };

    Ok(Prepared { kind, args_joined })
}

/// Compute this step's nop command (§4.6), the cache key.
pub fn nop_cmd(instr: &Instruction, prepared: &Prepared, build_args: &BuildArgs) -> Vec<String> {
    match &prepared.kind {
        PreparedKind::Run { cmd } => cache::run_nop_cmd(cmd, &build_args.effective),
        PreparedKind::Copy {
            instr_name,
            hash,
            dest,
            ..
        } => cache::copy_nop_cmd(instr_name, hash, dest),
        PreparedKind::Cmd { cmd } => cache::list_nop_cmd("CMD", cmd),
        PreparedKind::Entrypoint { cmd } => cache::list_nop_cmd("ENTRYPOINT", cmd),
        _ => cache::generic_nop_cmd(instr.name(), &prepared.args_joined),
    }
}

/// Main-hook (§4.4/§4.5): mutate `image` and, for `ADD`/`COPY`/`RUN`,
/// dispatch tasks to `host`.
pub async fn apply(
    prepared: &Prepared,
    image: &mut ImageState,
    build_args: &mut BuildArgs,
    cmd_set: &mut bool,
    host: &dyn TaskHost,
    paths: &StepPaths,
) -> Result<StepOutcome> {
    let mut outcome = StepOutcome::default();

    match &prepared.kind {
        PreparedKind::From { image_name } => {
            if image_name == "scratch" {
                *image = ImageState::scratch();
            } else {
                let reprovisioned = host
                    .image_reprovision(ImageReprovisionTask {
                        image_name: image_name.clone(),
                        cmd_name: "FROM",
                    })
                    .await?;

                let onbuild = reprovisioned.config.on_build.clone();
                let mut config = reprovisioned.config;
                config.on_build.clear();

                image.adopt_base(reprovisioned.id, config, reprovisioned.container_config);
                outcome.reprovisioned = true;
                outcome.onbuild_triggers = onbuild;
            }
        }
        PreparedKind::Arg { name, default } => {
            build_args.declare(name, default.clone());
        }
        PreparedKind::Maintainer { author } => {
            image.author = author.clone();
        }
        PreparedKind::Label { pairs } => {
            for (k, v) in pairs {
                image.config.labels.insert(k.clone(), v.clone());
            }
        }
        PreparedKind::Env { pairs } => {
            for (k, v) in pairs {
                set_env(&mut image.config.env, k, v);
            }
        }
        PreparedKind::Expose { ports } => {
            let set = image.config.exposed_ports.get_or_insert_with(Default::default);
            for p in ports {
                set.insert(p.clone());
            }
        }
        PreparedKind::Volume { vols } => {
            let set = image.config.volumes.get_or_insert_with(Default::default);
            for v in vols {
                set.insert(v.clone());
            }
        }
        PreparedKind::User { user } => {
            image.config.user = user.clone();
        }
        PreparedKind::Workdir { dir } => {
            image.config.working_dir = dir.clone();
        }
        PreparedKind::Cmd { cmd } => {
            image.config.cmd = Some(cmd.clone());
            *cmd_set = true;
        }
        PreparedKind::Entrypoint { cmd } => {
            image.config.entrypoint = Some(cmd.clone());
            if !*cmd_set {
                image.config.cmd = None;
            }
        }
        PreparedKind::StopSignal { sig } => {
            image.config.stop_signal = sig.clone();
        }
        PreparedKind::Onbuild { raw_line } => {
            image.config.on_build.push(raw_line.clone());
        }
        PreparedKind::Copy {
            infos,
            dest,
            instr_name,
            ..
        } => {
            run_copy_pipeline(host, instr_name, infos, dest, image, paths).await?;
        }
        PreparedKind::Run { cmd } => {
            let env = build_args.expansion_env(&image.config.env);
            let env = ensure_default_path(env);
            let workdir = if image.config.working_dir.is_empty() {
                "/".to_string()
            } else {
                image.config.working_dir.clone()
            };

            let result = host
                .run(RunTask {
                    cmd: cmd.clone(),
                    env,
                    workdir,
                    user: image.config.user.clone(),
                })
                .await?;

            if result.exit_code != 0 {
                return Err(Error::ExecFailure {
                    cmd: cmd.join(" "),
                    code: result.exit_code,
                });
            }
        }
    }

    Ok(outcome)
}

fn ensure_default_path(mut env: Vec<String>) -> Vec<String> {
    if !env.iter().any(|kv| kv.starts_with("PATH=")) {
        env.push(crate::constants::DEFAULT_PATH_ENV.to_string());
    }
    env
}

fn expand_tokens(raw_args: &str, env: &[String]) -> Result<Vec<String>> {
    let tokens = parser::split_words(raw_args)?;
    tokens.iter().map(|t| shell_word::expand(t, env)).collect()
}

fn parse_kv_pairs(tokens: &[String], instr_name: &str) -> Result<Vec<(String, String)>> {
    if tokens.is_empty() {
        return Err(Error::InputError(format!(
            "{instr_name} requires at least one key-value pair"
        )));
    }

    if !tokens[0].contains('=') {
        // Legacy two-arg form: `ENV key value`.
        if tokens.len() < 2 {
            return Err(Error::InputError(format!(
                "{instr_name} requires a key and a value"
            )));
        }
        return Ok(vec![(tokens[0].clone(), tokens[1..].join(" "))]);
    }

    tokens
        .iter()
        .map(|t| {
            t.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| {
                    Error::InputError(format!("malformed {instr_name} pair: '{t}'"))
                })
        })
        .collect()
}

fn expand_port_ranges(tokens: &[String]) -> Result<Vec<String>> {
    let mut out = Vec::new();

    for token in tokens {
        let lower = token.to_lowercase();
        let (port_part, proto) = match lower.split_once('/') {
            Some((p, proto)) => (p, proto.to_string()),
            None => (lower.as_str(), "tcp".to_string()),
        };

        match port_part.split_once('-') {
            Some((start, end)) => {
                let start: u32 = start
                    .parse()
                    .map_err(|_| Error::InputError(format!("invalid port range: {token}")))?;
                let end: u32 = end
                    .parse()
                    .map_err(|_| Error::InputError(format!("invalid port range: {token}")))?;
                if end < start {
                    return Err(Error::InputError(format!(
                        "invalid port range (end before start): {token}"
                    )));
                }
                for port in start..=end {
                    out.push(format!("{port}/{proto}"));
                }
            }
            None => {
                let port: u32 = port_part
                    .parse()
                    .map_err(|_| Error::InputError(format!("invalid port: {token}")))?;
                out.push(format!("{port}/{proto}"));
            }
        }
    }

    Ok(out)
}

fn normalize_workdir(current: &str, arg: &str) -> String {
    let joined = if arg.starts_with('/') {
        arg.to_string()
    } else if current.is_empty() {
        format!("/{arg}")
    } else {
        format!("{}/{}", current.trim_end_matches('/'), arg)
    };

    let mut out: Vec<&str> = Vec::new();
    for comp in joined.split('/') {
        match comp {
            "" | "." => continue,
            ".." => {
                out.pop();
            }
            other => out.push(other),
        }
    }

    if out.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", out.join("/"))
    }
}

fn shell_wrap(raw_args: &str) -> Vec<String> {
    if let Some(v) = parser::parse_exec_form(raw_args) {
        v
    } else {
        vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            raw_args.trim().to_string(),
        ]
    }
}

async fn run_copy_pipeline(
    host: &dyn TaskHost,
    instr_name: &'static str,
    infos: &[CopyInfo],
    dest: &str,
    image: &ImageState,
    paths: &StepPaths,
) -> Result<()> {
    if instr_name == "ADD" && infos.len() == 1 && !infos[0].is_dir {
        let source_real = paths.context_root.join(&infos[0].orig_path);
        if let Some(compression) = context::detect_archive(&source_real)? {
            let dest_abs = absolute_dest(dest, &image.config.working_dir);
            let extract_dir = if dest.ends_with('/') {
                resolve_under_root(&dest_abs, "/", paths.container_root)?
            } else {
                let parent = parent_dir(&dest_abs);
                resolve_under_root(&parent, "/", paths.container_root)?
            };

            create_dir_chowned(&extract_dir, paths.chown_uid, paths.chown_gid)?;

            host.extract_tarfile(ExtractTarfileTask {
                tarfile: source_real,
                extract_dir,
                strip_dir_count: 0,
                rename_to: None,
                paths: None,
                compression: Some(compression),
            })
            .await?;

            return Ok(());
        }
    }

    for info in infos {
        materialize(host, info, paths).await?;
    }

    Ok(())
}

fn absolute_dest(dest: &str, working_dir: &str) -> String {
    if dest.starts_with('/') {
        dest.to_string()
    } else {
        format!("{}/{}", working_dir.trim_end_matches('/'), dest)
    }
}

fn parent_dir(path: &str) -> String {
    match path.trim_end_matches('/').rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
        None => "/".to_string(),
    }
}

async fn materialize(host: &dyn TaskHost, info: &CopyInfo, paths: &StepPaths) -> Result<()> {
    let dest_real = resolve_under_root(
        &info.dest_path.to_string_lossy(),
        "/",
        paths.container_root,
    )?;

    let parent = dest_real.parent().ok_or_else(|| {
        Error::InputError(format!("no parent for destination {}", dest_real.display()))
    })?;

    create_dir_chowned(parent, paths.chown_uid, paths.chown_gid)?;

    let dest_name = info.dest_path.file_name();
    let orig_name = info.orig_path.file_name();
    let rename_to = match (dest_name, orig_name) {
        (Some(d), Some(o)) if d == o => None,
        (Some(d), _) => Some(PathBuf::from(d)),
        (None, _) => None,
    };

    host.extract_tarfile(ExtractTarfileTask {
        tarfile: paths.context_archive_path.to_path_buf(),
        extract_dir: parent.to_path_buf(),
        strip_dir_count: info.orig_path.components().count().saturating_sub(1) as u32,
        rename_to,
        paths: Some(vec![info.orig_path.clone()]),
        compression: None,
    })
    .await
}

fn create_dir_chowned(dir: &Path, uid: u32, gid: u32) -> Result<()> {
    if dir.exists() {
        return Ok(());
    }

    let mut to_create = Vec::new();
    let mut cur = dir.to_path_buf();
    while !cur.exists() {
        to_create.push(cur.clone());
        match cur.parent() {
            Some(p) => cur = p.to_path_buf(),
            None => break,
        }
    }

    for dir in to_create.into_iter().rev() {
        std::fs::create_dir(&dir)?;
        #[cfg(unix)]
        {
            let _ = nix::unistd::chown(
                &dir,
                Some(nix::unistd::Uid::from_raw(uid)),
                Some(nix::unistd::Gid::from_raw(gid)),
            );
        }
    }

    Ok(())
}
