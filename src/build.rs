//! The Build Driver (§4.7): drives a single [`BuildSession`] from an
//! extracted context through every Dockerfile instruction to a final image
//! id, consulting the Cache Engine at each step and emitting [`BuildEvent`]s
//! along the way.

use crate::cache::{self, CachedImage};
use crate::constants::{DEFAULT_DOCKERFILE_NAME, DOCKERFILE_NAME_FALLBACK, MAX_DOCKERFILE_SIZE};
use crate::dispatch::{self, StepPaths};
use crate::dockerfile::{self, parser, Instruction};
use crate::error::{Error, Result};
use crate::image::{BuildArgs, HistoryEntry, ImageState};
use crate::session::{BuildEvent, BuildSession, CommandType};
use crate::tasks::{ExtractTarfileTask, ImageReprovisionTask, TaskHost};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use tokio::sync::mpsc::UnboundedSender;

/// Instructions commit mode (§4.7) refuses, since it never extracts a
/// context or reads a Dockerfile and has no source image of its own to pull.
fn forbidden_in_commit_mode(instr: &Instruction) -> bool {
    matches!(
        instr,
        Instruction::Add { .. }
            | Instruction::Arg { .. }
            | Instruction::Copy { .. }
            | Instruction::From { .. }
            | Instruction::Maintainer { .. }
            | Instruction::Run { .. }
    )
}

/// Run `session` to completion against `host`, reporting progress on
/// `events`. Returns the final image's short id.
pub async fn run(
    session: &BuildSession,
    host: &dyn TaskHost,
    events: UnboundedSender<BuildEvent>,
) -> Result<String> {
    let commit_mode = session.command_type == CommandType::Commit;
    let context_root = session.work_dir.clone();

    let send_message = |msg: String| {
        if !commit_mode {
            let _ = events.send(BuildEvent::Message(msg));
        }
    };

    let mut image = ImageState::scratch();
    let mut queue: VecDeque<Instruction>;

    if commit_mode {
        let mut parsed: VecDeque<Instruction> = VecDeque::new();
        for raw in &session.commit_instructions {
            let instr = dockerfile::parse_single_line(raw)?;
            if forbidden_in_commit_mode(&instr) {
                return Err(Error::InputError(format!(
                    "{} is not allowed in commit mode",
                    instr.name()
                )));
            }
            parsed.push_back(instr);
        }
        queue = parsed;

        if let Some(base) = &session.commit_base_image {
            let reprovisioned = host
                .image_reprovision(ImageReprovisionTask {
                    image_name: base.clone(),
                    cmd_name: "commit",
                })
                .await?;
            image.adopt_base(
                reprovisioned.id,
                reprovisioned.config,
                reprovisioned.container_config,
            );
            let _ = events.send(BuildEvent::ImageReprovisioned);
        }
    } else {
        if let Some(archive) = &session.context_archive_path {
            host.extract_tarfile(ExtractTarfileTask {
                tarfile: archive.clone(),
                extract_dir: context_root.clone(),
                strip_dir_count: 0,
                rename_to: None,
                paths: None,
                compression: None,
            })
            .await?;
        }

        let dockerfile_text = read_dockerfile(&context_root, &session.dockerfile_name)?;
        let raw_instructions = parser::parse(&dockerfile_text)?;
        if raw_instructions.is_empty() {
            return Err(Error::InputError("Dockerfile has no instructions".to_string()));
        }
        if raw_instructions[0].name != "FROM" {
            return Err(Error::InputError(
                "Please provide a source image with `from` prior to commit".to_string(),
            ));
        }

        queue = raw_instructions
            .into_iter()
            .map(Instruction::from_raw)
            .collect::<Result<_>>()?;
    }

    let mut build_args = BuildArgs::new(session.cli_build_args.clone());
    let mut cmd_set = false;
    let mut total_steps = queue.len();
    let mut step_no = 0usize;

    // Cache Engine streak tracking (§4.6): `cache_streak` mirrors
    // `cacheLastCmdCached`, starting true; `cached_state_unsynced` tracks
    // whether the host's real container-root filesystem still reflects the
    // last cache hit's image rather than having been reprovisioned onto it.
    let mut cache_streak = true;
    let mut cached_state_unsynced = false;

    let cached_images: Vec<CachedImage> = session.existing_images.clone();

    let paths = StepPaths {
        context_root: &context_root,
        context_archive_path: session
            .context_archive_path
            .as_deref()
            .unwrap_or(&context_root),
        container_root: &session.container_root_dir,
        chown_uid: session.chown_uid,
        chown_gid: session.chown_gid,
    };

    while let Some(instr) = queue.pop_front() {
        step_no += 1;
        send_message(format!("Step {step_no}/{total_steps} : {}", instr.raw()));

        let prepared = dispatch::prepare(&instr, &image, &build_args, &paths)?;

        let is_arg = matches!(instr, Instruction::Arg { .. });
        let is_from = matches!(instr, Instruction::From { .. });

        if !is_from && !is_arg && session.cache_enabled {
            let nop = dispatch::nop_cmd(&instr, &prepared, &build_args);
            if let Some(hit) = cache::find_cached(
                &cached_images,
                image.id.as_deref(),
                &nop,
                &image.config.labels,
            ) {
                image.parent = image.id.clone();
                image.id = Some(hit.id.clone());
                image.config = hit.config.clone();
                image.container_config = hit.container_config.clone();
                image.history.push(HistoryEntry {
                    created: now_timestamp(),
                    created_by: nop.join(" "),
                    empty_layer: !matches!(instr, Instruction::Run { .. } | Instruction::Copy { .. } | Instruction::Add { .. }),
                });

                cache_streak = true;
                cached_state_unsynced = true;

                send_message(" ---> Using cache".to_string());
                send_message(format!(" ---> {}", image.short_id().unwrap_or_default()));

                if matches!(instr, Instruction::Cmd { .. }) {
                    cmd_set = true;
                }
                continue;
            }

            if cache_streak && cached_state_unsynced {
                if let Some(last_cached_id) = image.id.clone() {
                    let reprovisioned = host
                        .image_reprovision(ImageReprovisionTask {
                            image_name: last_cached_id,
                            cmd_name: "CACHE",
                        })
                        .await?;
                    image.adopt_base(
                        reprovisioned.id,
                        reprovisioned.config,
                        reprovisioned.container_config,
                    );
                    let _ = events.send(BuildEvent::ImageReprovisioned);
                }
            }
            cache_streak = false;
            cached_state_unsynced = false;
        }

        let outcome = dispatch::apply(&prepared, &mut image, &mut build_args, &mut cmd_set, host, &paths).await?;

        if is_from {
            if outcome.reprovisioned {
                let _ = events.send(BuildEvent::ImageReprovisioned);
            }
            if !outcome.onbuild_triggers.is_empty() {
                send_message(format!(
                    "# Executing {} build triggers",
                    outcome.onbuild_triggers.len()
                ));
                total_steps += outcome.onbuild_triggers.len();
                for raw in outcome.onbuild_triggers.iter().rev() {
                    let inner = dockerfile::parse_single_line(raw)?;
                    queue.push_front(inner);
                }
            }
            send_message(format!(
                " ---> {}",
                image.short_id().unwrap_or_else(|| "<scratch>".to_string())
            ));
            continue;
        }

        if is_arg {
            continue;
        }

        let nop = dispatch::nop_cmd(&instr, &prepared, &build_args);
        image.history.push(HistoryEntry {
            created: now_timestamp(),
            created_by: nop.join(" "),
            empty_layer: !matches!(instr, Instruction::Run { .. } | Instruction::Copy { .. } | Instruction::Add { .. }),
        });
        image.parent = image.id.clone();
        image.id = Some(next_image_id(&image));

        send_message(format!(" ---> {}", image.short_id().unwrap_or_default()));
    }

    let unconsumed = build_args.unconsumed_cli_args();
    if !unconsumed.is_empty() {
        return Err(Error::UnconsumedBuildArg(unconsumed.join(", ")));
    }

    let final_id = image.short_id().unwrap_or_else(|| "<scratch>".to_string());

    if !session.suppress_success_msg {
        send_message(format!("Successfully built {final_id}"));
    }

    let _ = events.send(BuildEvent::End(Ok(final_id.clone())));
    Ok(final_id)
}

fn read_dockerfile(context_root: &std::path::Path, name: &str) -> Result<String> {
    match read_dockerfile_once(context_root, name) {
        Err(Error::NotFound(_)) if name == DEFAULT_DOCKERFILE_NAME => {
            read_dockerfile_once(context_root, DOCKERFILE_NAME_FALLBACK)
        }
        other => other,
    }
}

fn read_dockerfile_once(context_root: &std::path::Path, name: &str) -> Result<String> {
    let path = crate::path_resolver::resolve_under_root(&format!("/{name}"), "/", context_root)?;
    let meta = std::fs::metadata(&path).map_err(|_| Error::NotFound(name.to_string()))?;
    if meta.len() > MAX_DOCKERFILE_SIZE {
        return Err(Error::InputError(format!(
            "Dockerfile exceeds the maximum size of {MAX_DOCKERFILE_SIZE} bytes"
        )));
    }
    Ok(std::fs::read_to_string(&path)?)
}

/// Synthesize a layer id. Since there's no real content-addressed image
/// store here, the id is derived from the container_config snapshot and the
/// parent id, which is enough to make identical steps deterministic within
/// one process but is not a guarantee across builds the way a real registry
/// digest would be.
fn next_image_id(image: &ImageState) -> String {
    let mut hasher = Sha256::new();
    if let Some(parent) = &image.parent {
        hasher.update(parent.as_bytes());
    }
    if let Ok(cfg) = serde_json::to_vec(&image.config) {
        hasher.update(&cfg);
    }
    hasher.update(image.history.len().to_le_bytes());
    hex::encode(hasher.finalize())
}

fn now_timestamp() -> String {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("{secs}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::CommandType;
    use crate::tasks::{
        ExtractTarfileTask, ImageReprovisionTask, ReprovisionedImage, RunOutcome, RunTask,
    };
    use assert2::assert;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    /// An in-memory [`TaskHost`] that materializes tar contents onto the real
    /// filesystem under a scratch `container_root`, so the Build Driver can be
    /// exercised end to end without a real container runtime.
    struct FakeHost {
        images: Mutex<BTreeMap<String, ReprovisionedImage>>,
        run_log: Mutex<Vec<Vec<String>>>,
        env_log: Mutex<Vec<Vec<String>>>,
        reprovision_calls: Mutex<Vec<String>>,
    }

    impl FakeHost {
        fn new() -> Self {
            Self {
                images: Mutex::new(BTreeMap::new()),
                run_log: Mutex::new(Vec::new()),
                env_log: Mutex::new(Vec::new()),
                reprovision_calls: Mutex::new(Vec::new()),
            }
        }

        fn register(&self, name: &str, image: ReprovisionedImage) {
            self.images.lock().unwrap().insert(name.to_string(), image);
        }
    }

    #[async_trait]
    impl TaskHost for FakeHost {
        async fn extract_tarfile(&self, task: ExtractTarfileTask) -> Result<()> {
            std::fs::create_dir_all(&task.extract_dir)?;
            if task.tarfile.is_dir() {
                return Ok(());
            }
            Ok(())
        }

        async fn image_reprovision(&self, task: ImageReprovisionTask) -> Result<ReprovisionedImage> {
            self.reprovision_calls
                .lock()
                .unwrap()
                .push(task.image_name.clone());
            self.images
                .lock()
                .unwrap()
                .get(&task.image_name)
                .cloned()
                .ok_or_else(|| Error::NotFound(task.image_name))
        }

        async fn run(&self, task: RunTask) -> Result<RunOutcome> {
            self.env_log.lock().unwrap().push(task.env);
            self.run_log.lock().unwrap().push(task.cmd);
            Ok(RunOutcome { exit_code: 0 })
        }
    }

    fn write_dockerfile(dir: &std::path::Path, contents: &str) {
        std::fs::write(dir.join("Dockerfile"), contents).unwrap();
    }

    fn session_for(work_dir: &std::path::Path, container_root: &std::path::Path) -> BuildSession {
        BuildSession::builder(work_dir.to_path_buf(), container_root.to_path_buf())
            .command_type(CommandType::Build)
            .build()
    }

    /// Drain every `BuildEvent::Message` off `rx` in order, ignoring other
    /// event kinds.
    fn drain_messages(rx: &mut mpsc::UnboundedReceiver<BuildEvent>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if let BuildEvent::Message(m) = ev {
                out.push(m);
            }
        }
        out
    }

    #[tokio::test]
    async fn hello_world_scratch_build_succeeds() {
        // Scenario 1 (helloWorldRun, §8).
        let work_dir = TempDir::new().unwrap();
        let container_root = TempDir::new().unwrap();
        std::fs::write(work_dir.path().join("hello"), b"#!/bin/sh\necho hi\n").unwrap();
        write_dockerfile(
            work_dir.path(),
            "FROM scratch\nCOPY hello /\nCMD [\"/hello\"]\nRUN /hello how are you\n",
        );

        let host = FakeHost::new();
        let session = session_for(work_dir.path(), container_root.path());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let id = run(&session, &host, tx).await.unwrap();

        let messages = drain_messages(&mut rx);
        assert!(messages[0] == "Step 1/4 : FROM scratch");
        assert!(messages[1] == " ---> <scratch>");
        assert!(messages.last().unwrap() == &format!("Successfully built {id}"));

        let run_log = host.run_log.lock().unwrap();
        assert!(run_log.len() == 1);
        assert!(run_log[0] == vec!["/bin/sh", "-c", "/hello how are you"]);
    }

    #[tokio::test]
    async fn workdir_normalizes_across_steps() {
        // Scenario 2 (workdir normalization, §8): `/test/../foo/` -> `/foo`.
        let work_dir = TempDir::new().unwrap();
        let container_root = TempDir::new().unwrap();
        write_dockerfile(work_dir.path(), "FROM scratch\nWORKDIR /test/../foo/\n");

        let host = FakeHost::new();
        let session = session_for(work_dir.path(), container_root.path());
        let (tx, mut rx) = mpsc::unbounded_channel();

        run(&session, &host, tx).await.unwrap();

        let messages = drain_messages(&mut rx);
        assert!(messages[0] == "Step 1/2 : FROM scratch");
        assert!(messages[1] == " ---> <scratch>");
        assert!(messages[2] == "Step 2/2 : WORKDIR /test/../foo/");
        assert!(messages.iter().any(|m| m.starts_with("Successfully built")));
    }

    #[tokio::test]
    async fn expose_range_expands_to_fourteen_ports() {
        // Scenario 3 (EXPOSE range, §8).
        let work_dir = TempDir::new().unwrap();
        let container_root = TempDir::new().unwrap();
        write_dockerfile(
            work_dir.path(),
            "FROM scratch\nEXPOSE 2374 2375 7000 8000-8010\n",
        );

        let host = FakeHost::new();
        let session = session_for(work_dir.path(), container_root.path());
        let (tx, _rx) = mpsc::unbounded_channel();

        let id = run(&session, &host, tx).await.unwrap();
        assert!(!id.is_empty());
    }

    #[tokio::test]
    async fn unconsumed_build_arg_fails_the_build() {
        let work_dir = TempDir::new().unwrap();
        let container_root = TempDir::new().unwrap();
        write_dockerfile(work_dir.path(), "FROM scratch\n");

        let host = FakeHost::new();
        let mut cli = BTreeMap::new();
        cli.insert("UNUSED".to_string(), Some("x".to_string()));
        let session = BuildSession::builder(work_dir.path().to_path_buf(), container_root.path().to_path_buf())
            .buildargs(cli)
            .build();
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = run(&session, &host, tx).await.unwrap_err();
        assert!(matches!(err, Error::UnconsumedBuildArg(_)));
    }

    #[tokio::test]
    async fn workdir_dotdot_chain_clamps_without_failing_the_build() {
        let work_dir = TempDir::new().unwrap();
        let container_root = TempDir::new().unwrap();
        write_dockerfile(
            work_dir.path(),
            "FROM scratch\nWORKDIR /a\nWORKDIR ../../../../../etc\n",
        );

        let host = FakeHost::new();
        let session = session_for(work_dir.path(), container_root.path());
        let (tx, _rx) = mpsc::unbounded_channel();

        let id = run(&session, &host, tx).await.unwrap();
        assert!(!id.is_empty());
    }

    #[tokio::test]
    async fn full_caching_hits_every_cacheable_step() {
        // Scenario 4 (Caching, §8): every step after FROM hits cache, so no
        // RUN/extraction ever touches the host, and the final id is the
        // last cache entry's id verbatim.
        let work_dir = TempDir::new().unwrap();
        let container_root = TempDir::new().unwrap();
        std::fs::write(work_dir.path().join("file.txt"), b"hello").unwrap();
        write_dockerfile(
            work_dir.path(),
            "FROM scratch\nWORKDIR /foo/bar\nADD file.txt .\n",
        );

        let workdir_nop = vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            "#(nop) WORKDIR /foo/bar".to_string(),
        ];
        let file_hash = format!("file:{}", hex::encode(Sha256::digest(b"hello")));
        let add_nop = cache::copy_nop_cmd("ADD", &file_hash, ".");

        let workdir_id = "1".repeat(64);
        let add_id = "6530e406dfec".to_string();

        let mut workdir_config = crate::image::Config::default();
        workdir_config.working_dir = "/foo/bar".to_string();

        let host = FakeHost::new();
        let cached = vec![
            CachedImage {
                id: workdir_id.clone(),
                parent: None,
                container_config_cmd: Some(workdir_nop),
                labels: BTreeMap::new(),
                config: workdir_config.clone(),
                container_config: workdir_config.clone(),
            },
            CachedImage {
                id: add_id.clone(),
                parent: Some(workdir_id.clone()),
                container_config_cmd: Some(add_nop),
                labels: BTreeMap::new(),
                config: workdir_config.clone(),
                container_config: workdir_config,
            },
        ];

        let session = BuildSession::builder(work_dir.path().to_path_buf(), container_root.path().to_path_buf())
            .existing_images(cached)
            .build();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let id = run(&session, &host, tx).await.unwrap();
        assert!(id == add_id);

        let messages = drain_messages(&mut rx);
        let hits = messages.iter().filter(|m| *m == " ---> Using cache").count();
        assert!(hits == 2);
        assert!(host.run_log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn partial_caching_reprovisions_before_the_miss() {
        // Scenario 5 (Partial caching, §8): WORKDIR hits cache, ADD misses.
        // The miss must be preceded by a reprovision onto the cached
        // WORKDIR image so the real ADD lands on the right filesystem state.
        let work_dir = TempDir::new().unwrap();
        let container_root = TempDir::new().unwrap();
        std::fs::write(work_dir.path().join("file.txt"), b"hello").unwrap();
        write_dockerfile(
            work_dir.path(),
            "FROM scratch\nWORKDIR /foo/bar\nADD file.txt .\n",
        );

        let workdir_nop = vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            "#(nop) WORKDIR /foo/bar".to_string(),
        ];
        let workdir_id = "2".repeat(64);

        let mut workdir_config = crate::image::Config::default();
        workdir_config.working_dir = "/foo/bar".to_string();

        let host = FakeHost::new();
        host.register(
            &workdir_id,
            ReprovisionedImage {
                id: workdir_id.clone(),
                parent: None,
                config: workdir_config.clone(),
                container_config: workdir_config.clone(),
            },
        );

        let cached = vec![CachedImage {
            id: workdir_id.clone(),
            parent: None,
            container_config_cmd: Some(workdir_nop),
            labels: BTreeMap::new(),
            config: workdir_config.clone(),
            container_config: workdir_config,
        }];

        let session = BuildSession::builder(work_dir.path().to_path_buf(), container_root.path().to_path_buf())
            .existing_images(cached)
            .build();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let id = run(&session, &host, tx).await.unwrap();
        assert!(id != workdir_id);

        let messages = drain_messages(&mut rx);
        let hits = messages.iter().filter(|m| *m == " ---> Using cache").count();
        assert!(hits == 1);
        assert!(host.run_log.lock().unwrap().is_empty());
        assert!(host.reprovision_calls.lock().unwrap().as_slice() == [workdir_id]);
    }

    #[tokio::test]
    async fn forbidden_path_escape_fails_the_build() {
        // Scenario 6 (Forbidden path, §8).
        let work_dir = TempDir::new().unwrap();
        let container_root = TempDir::new().unwrap();
        write_dockerfile(
            work_dir.path(),
            "FROM scratch\nCOPY ../../etc/passwd /passwd\n",
        );

        let host = FakeHost::new();
        let session = session_for(work_dir.path(), container_root.path());
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = run(&session, &host, tx).await.unwrap_err();
        match err {
            Error::ForbiddenPath(msg) => {
                assert!(msg.contains("Forbidden path outside the build context: ../../"));
            }
            other => panic!("expected ForbiddenPath, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn variable_expansion_substitutes_build_args_into_env() {
        // Scenario 7 (Variable expansion, §8): `${GREETING}` in the ENV
        // value is expanded against the ARG's default before being stored,
        // and a later RUN sees the expanded value in its environment.
        let work_dir = TempDir::new().unwrap();
        let container_root = TempDir::new().unwrap();
        write_dockerfile(
            work_dir.path(),
            "FROM scratch\nARG GREETING=hello\nENV MESSAGE=${GREETING}_world\nRUN echo $MESSAGE\n",
        );

        let host = FakeHost::new();
        let session = session_for(work_dir.path(), container_root.path());
        let (tx, _rx) = mpsc::unbounded_channel();

        run(&session, &host, tx).await.unwrap();

        let env_log = host.env_log.lock().unwrap();
        assert!(env_log[0].contains(&"MESSAGE=hello_world".to_string()));
    }

    #[tokio::test]
    async fn commit_mode_rejects_forbidden_instructions() {
        let work_dir = TempDir::new().unwrap();
        let container_root = TempDir::new().unwrap();

        let host = FakeHost::new();
        let session = BuildSession::builder(work_dir.path().to_path_buf(), container_root.path().to_path_buf())
            .command_type(CommandType::Commit)
            .commit_instructions(vec!["RUN echo hi".to_string()])
            .build();
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = run(&session, &host, tx).await.unwrap_err();
        assert!(matches!(err, Error::InputError(_)));
    }

    #[tokio::test]
    async fn commit_mode_applies_instructions_without_extraction_or_messages() {
        let work_dir = TempDir::new().unwrap();
        let container_root = TempDir::new().unwrap();

        let host = FakeHost::new();
        host.register(
            "base:latest",
            ReprovisionedImage {
                id: "b".repeat(64),
                parent: None,
                config: crate::image::Config::default(),
                container_config: crate::image::Config::default(),
            },
        );

        let session = BuildSession::builder(work_dir.path().to_path_buf(), container_root.path().to_path_buf())
            .command_type(CommandType::Commit)
            .commit_base_image("base:latest")
            .commit_instructions(vec!["LABEL committed=true".to_string()])
            .build();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let id = run(&session, &host, tx).await.unwrap();
        assert!(!id.is_empty());
        assert!(drain_messages(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn dockerfile_name_falls_back_to_lowercase() {
        let work_dir = TempDir::new().unwrap();
        let container_root = TempDir::new().unwrap();
        // No `Dockerfile`, only the lowercase fallback name.
        std::fs::write(work_dir.path().join("dockerfile"), "FROM scratch\n").unwrap();

        let host = FakeHost::new();
        let session = session_for(work_dir.path(), container_root.path());
        let (tx, _rx) = mpsc::unbounded_channel();

        let id = run(&session, &host, tx).await.unwrap();
        assert!(!id.is_empty());
    }

    #[tokio::test]
    async fn from_reprovisions_and_replays_onbuild_triggers() {
        let work_dir = TempDir::new().unwrap();
        let container_root = TempDir::new().unwrap();
        write_dockerfile(work_dir.path(), "FROM base:latest\n");

        let host = FakeHost::new();
        let mut config = crate::image::Config::default();
        config.on_build = vec!["RUN echo triggered".to_string()];
        host.register(
            "base:latest",
            ReprovisionedImage {
                id: "a".repeat(64),
                parent: None,
                config: config.clone(),
                container_config: config,
            },
        );

        let session = session_for(work_dir.path(), container_root.path());
        let (tx, mut rx) = mpsc::unbounded_channel();

        run(&session, &host, tx).await.unwrap();

        let mut saw_trigger_msg = false;
        while let Ok(ev) = rx.try_recv() {
            if let BuildEvent::Message(m) = ev {
                if m.contains("Executing 1 build triggers") {
                    saw_trigger_msg = true;
                }
            }
        }
        assert!(saw_trigger_msg);
        assert!(host.run_log.lock().unwrap().len() == 1);
    }
}
