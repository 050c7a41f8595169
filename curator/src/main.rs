mod config;
mod db;
mod error;
mod filter;
mod generate;
mod hash;
mod models;
mod probe;
mod scan;
mod walker;

use std::{env, path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::{
    db::Store,
    filter::scenes::{FindFilter, SceneFilter},
    generate::{FfmpegGenerator, GeneratedPaths},
    probe::FfprobeRunner,
    scan::Scanner,
};

#[derive(Parser, Debug)]
#[command(name = "curator", about = "Personal media library manager")]
struct Args {
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Walk the configured library paths and reconcile the catalog.
    Scan,
    /// Query scene ids with a JSON scene filter.
    FindScenes {
        /// Path to a JSON file holding the scene filter.
        #[arg(long, value_name = "PATH")]
        filter: Option<PathBuf>,
        /// Free-text search over title, details and path.
        #[arg(long)]
        query: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 25)]
        per_page: u32,
        #[arg(long)]
        sort: Option<String>,
        #[arg(long)]
        direction: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let args = Args::parse();
    let config_path = args
        .config
        .or_else(|| env::var(config::CONFIG_PATH_ENV).ok().map(PathBuf::from));
    let settings = Arc::new(config::Settings::load(config_path)?);

    let store = Store::open(&settings.database.path).await?;

    match args.command {
        Command::Scan => {
            let probe = Arc::new(FfprobeRunner::new(settings.tools.ffprobe_path.clone()));
            let generator = Arc::new(FfmpegGenerator::new(
                GeneratedPaths::new(settings.library.generated_path.clone()),
                settings.generate.clone(),
                settings.tools.clone(),
            ));
            let scanner = Scanner::new(store, Arc::clone(&settings), probe, generator)?;
            scanner.run().await?;
        }
        Command::FindScenes {
            filter,
            query,
            page,
            per_page,
            sort,
            direction,
        } => {
            let scene_filter: SceneFilter = match filter {
                Some(path) => {
                    let raw = std::fs::read_to_string(&path)?;
                    serde_json::from_str(&raw)?
                }
                None => SceneFilter::default(),
            };
            let find_filter = FindFilter {
                q: query,
                page,
                per_page,
                sort,
                direction,
            };

            let mut conn = store.read().await?;
            let (ids, count) =
                filter::scenes::scene_query(&mut conn, &scene_filter, &find_filter).await?;
            println!("{}", serde_json::json!({ "count": count, "ids": ids }));
        }
    }

    Ok(())
}
