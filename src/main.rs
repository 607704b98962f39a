use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use doorbell_faces::collab::{ChannelNotifier, ImageLoader, MemoryFaceStore, ReplayProvider};
use doorbell_faces::config::Config;
use doorbell_faces::faces::{Collaborators, DirectoryLayout, FacePipeline, ProcessingQueue};
use doorbell_faces::logging;

struct CliArgs {
    image: PathBuf,
    detections: PathBuf,
    event_id: i64,
    config_path: Option<PathBuf>,
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut image = None;
    let mut detections = None;
    let mut event_id: i64 = 1;
    let mut config_path = None;

    let value = |i: usize, flag: &str| -> String {
        match args.get(i + 1) {
            Some(v) => v.clone(),
            None => {
                eprintln!("Error: {} requires an argument", flag);
                std::process::exit(1);
            }
        }
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("doorbell-faces {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--image" | "-i" => {
                image = Some(PathBuf::from(value(i, "--image")));
                i += 1;
            }
            "--detections" | "-d" => {
                detections = Some(PathBuf::from(value(i, "--detections")));
                i += 1;
            }
            "--event-id" | "-e" => {
                let raw = value(i, "--event-id");
                event_id = match raw.parse() {
                    Ok(id) => id,
                    Err(_) => {
                        eprintln!("Error: invalid event id: {}", raw);
                        std::process::exit(1);
                    }
                };
                i += 1;
            }
            "--config" | "-c" => {
                config_path = Some(PathBuf::from(value(i, "--config")));
                i += 1;
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    match (image, detections) {
        (Some(image), Some(detections)) => CliArgs {
            image,
            detections,
            event_id,
            config_path,
        },
        _ => {
            eprintln!("Error: --image and --detections are required");
            print_help();
            std::process::exit(1);
        }
    }
}

fn print_help() {
    println!(
        r#"doorbell-faces - replay a face detection response through the ingestion pipeline

USAGE:
    doorbell-faces --image PATH --detections FILE [OPTIONS]

OPTIONS:
    --image, -i PATH        Event snapshot (local path, /uploads/... or http(s) URL)
    --detections, -d FILE   Provider response: JSON array or {{"faces": [...]}}
    --event-id, -e N        Visitor event id (default 1)
    --config, -c PATH       Path to config file
    --version, -V           Show version
    --help, -h              Show this help message

ENVIRONMENT:
    DOORBELL_FACES_CONFIG   Path to config file (overrides default location)
    DOORBELL_FACES_LOG      Log level (trace, debug, info, warn, error)

Notifications are printed to stdout, one JSON object per line.
Config file location: $XDG_CONFIG_HOME/doorbell-faces/config.toml"#
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();

    // Initialize logging (uses journald on Linux, file fallback otherwise)
    if let Err(e) = logging::init(None) {
        eprintln!("Warning: logging unavailable: {:#}", e);
    }

    let config = Config::load(args.config_path.as_deref())?;

    let layout = DirectoryLayout::new(&config.storage);
    layout
        .validate()
        .with_context(|| format!("preparing storage under {}", config.storage.base_dir.display()))?;

    let provider = ReplayProvider::from_file(&args.detections)
        .with_context(|| format!("loading detections from {}", args.detections.display()))?;
    tracing::info!(faces = provider.len(), event_id = args.event_id, "Replaying detections");

    let (notifier, mut notifications) = ChannelNotifier::new();
    let pipeline = Arc::new(FacePipeline::new(
        &config,
        Collaborators {
            provider: Arc::new(provider),
            images: Arc::new(ImageLoader::new(&config.storage, &config.download)),
            store: Arc::new(MemoryFaceStore::new()),
            notifier: Arc::new(notifier),
            layout: Arc::new(layout),
        },
    ));

    let removed = pipeline.cleanup_old_files().await;
    if removed > 0 {
        tracing::info!(removed, "Removed expired face files");
    }

    let queue = ProcessingQueue::from_config(pipeline.clone(), &config.queue);
    queue.enqueue(args.event_id, args.image.to_string_lossy())?;
    let stats = queue.shutdown().await;

    while let Ok(notification) = notifications.try_recv() {
        println!("{}", notification.to_json());
    }

    if stats.failed > 0 || stats.timed_out > 0 {
        bail!("event {} was not processed", args.event_id);
    }

    Ok(())
}
