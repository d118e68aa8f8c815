use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use imagesmith::host::LocalHost;
use imagesmith::session::{BuildEvent, BuildSession, CommandType};
use imagesmith::{build, utils};
use log::{error, info};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(subcommand)]
    subcommand: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Build an image from a Dockerfile and a build context.
    #[clap(name = "build")]
    Build {
        /// Directory holding the build context (and, unless overridden, the Dockerfile).
        context: PathBuf,

        #[clap(long = "file", short = 'f')]
        dockerfile: Option<String>,

        #[clap(long = "build-arg")]
        build_arg: Vec<String>,

        #[clap(long = "label")]
        label: Vec<String>,

        #[clap(long = "no-cache")]
        no_cache: bool,

        #[clap(long = "quiet", short = 'q')]
        quiet: bool,

        /// uid[:gid] applied to directories the Copy Pipeline creates.
        #[clap(long = "chown")]
        chown: Option<String>,

        /// Root of the local base-image store (config.json + rootfs per tag).
        #[clap(long = "image-store", default_value = "./imagesmith-store")]
        image_store: PathBuf,

        /// Scratch directory materializing the image under construction.
        #[clap(long = "container-root")]
        container_root: Option<PathBuf>,

        #[clap(long = "existing-images")]
        existing_images: Option<PathBuf>,
    },
}

fn parse_kv_list(pairs: &[String], flag: &str) -> Result<BTreeMap<String, Option<String>>> {
    let mut out = BTreeMap::new();
    for pair in pairs {
        match pair.split_once('=') {
            Some((k, v)) => {
                out.insert(k.to_string(), Some(v.to_string()));
            }
            None => {
                out.insert(pair.clone(), None);
            }
        }
    }
    if pairs.iter().any(|p| p.is_empty()) {
        return Err(anyhow!("empty {flag} entry"));
    }
    Ok(out)
}

fn parse_chown(spec: &str) -> Result<(u32, u32)> {
    match spec.split_once(':') {
        Some((uid, gid)) => Ok((uid.parse()?, gid.parse()?)),
        None => {
            let uid: u32 = spec.parse()?;
            Ok((uid, uid))
        }
    }
}

async fn run(args: Cli) -> Result<()> {
    match args.subcommand {
        Commands::Build {
            context,
            dockerfile,
            build_arg,
            label,
            no_cache,
            quiet,
            chown,
            image_store,
            container_root,
            existing_images,
        } => {
            let build_args = parse_kv_list(&build_arg, "--build-arg")?;
            let labels = parse_kv_list(&label, "--label")?
                .into_iter()
                .map(|(k, v)| (k, v.unwrap_or_default()))
                .collect::<BTreeMap<_, _>>();

            let container_root = match container_root {
                Some(p) => p,
                None => tempfile::tempdir()?.into_path(),
            };

            let mut builder = BuildSession::builder(context, container_root.clone())
                .buildargs(build_args)
                .labels(labels)
                .nocache(no_cache)
                .suppress_success_msg(quiet)
                .command_type(CommandType::Build);

            if let Some(name) = dockerfile {
                builder = builder.dockerfile(name);
            }
            if let Some(spec) = chown {
                let (uid, gid) = parse_chown(&spec)?;
                builder = builder.chown(uid, gid);
            }
            if let Some(path) = existing_images {
                let bytes = std::fs::read(&path)?;
                let cached: Vec<imagesmith::cache::CachedImage> = serde_json::from_slice(&bytes)?;
                builder = builder.existing_images(cached);
            }

            let session = builder.build();
            let host = LocalHost::new(image_store, container_root);
            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

            let driver = tokio::spawn(async move { build::run(&session, &host, tx).await });

            while let Some(event) = rx.recv().await {
                match event {
                    BuildEvent::Message(msg) => println!("{msg}"),
                    BuildEvent::ImageReprovisioned => {
                        info!("container root reprovisioned from base image");
                    }
                    BuildEvent::End(Ok(id)) => {
                        info!("build finished: {id}");
                    }
                    BuildEvent::End(Err(msg)) => {
                        error!("build failed: {msg}");
                    }
                }
            }

            driver.await??;
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    utils::init_logging();

    let args = Cli::parse();

    if let Err(err) = run(args).await {
        error!("error: {err:#}");
        std::process::exit(1);
    }
}
