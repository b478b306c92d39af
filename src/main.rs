use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::{Receiver, bounded, select};
use indicatif::{ProgressBar, ProgressStyle};
use matcherdb::catalog::{self, CatalogLoader, CatalogSources, LoadState, ReloadOutcome};
use matcherdb::config::AppConfig;
use matcherdb::db::Database;
use matcherdb::matcher::MatcherTrack;
use matcherdb::shard::{ShardLoad, ShardTrack};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "matcherdb", version, about = "Browse the song catalogue of on-device music recognition databases")]
struct Cli {
    /// Path to the SQLite cache database
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Where to read matcher files from; overrides the config file.
#[derive(clap::Args)]
struct SourceArgs {
    /// Core matcher file
    #[arg(long)]
    core: Option<PathBuf>,

    /// Known end offset of the core matcher's entries
    #[arg(long)]
    core_offset: Option<u64>,

    /// Superpack index directory
    #[arg(long)]
    superpacks: Option<PathBuf>,

    /// Number of parallel workers (0 = auto-detect from config)
    #[arg(short = 'j', long, default_value = "0")]
    jobs: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Locate the end of the entry region in a matcher file
    Offset {
        file: PathBuf,
    },

    /// Decode the tracks of a single matcher file
    Decode {
        file: PathBuf,

        /// End offset of the entry region (located if omitted)
        #[arg(long)]
        offset: Option<u64>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Load every matcher file and list the combined catalogue
    Catalog {
        #[command(flatten)]
        sources: SourceArgs,

        /// Only show tracks whose title contains this text
        #[arg(short, long)]
        search: Option<String>,

        /// Forget remembered offsets and scan every file again
        #[arg(long)]
        rescan: bool,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the artists in the catalogue, or one artist's tracks
    Artists {
        #[command(flatten)]
        sources: SourceArgs,

        /// Only show artists whose name contains this text
        #[arg(short, long)]
        search: Option<String>,

        /// Show the tracks of this artist instead
        #[arg(long)]
        artist: Option<String>,
    },

    /// Load shard tracks, from the cache when the files are unchanged
    Shards {
        /// Shard track directory (defaults to config shard_tracks_dir)
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Decode the files even if the cache is current
        #[arg(long)]
        force: bool,

        /// Only show tracks whose name contains this text
        #[arg(short, long)]
        search: Option<String>,

        /// Number of parallel workers (0 = auto-detect from config)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Empty the shard track cache
    ClearCache {
        /// Also forget remembered matcher offsets
        #[arg(long)]
        offsets: bool,
    },

    /// Show the installed version of a superpack
    Version {
        /// Superpack name
        #[arg(default_value = matcherdb::SUPERPACK_AMBIENT_MUSIC_INDEX)]
        name: String,

        /// Manifest directory (defaults to config manifests_dir)
        #[arg(long)]
        manifests: Option<PathBuf>,
    },

    /// Show cache statistics
    Stats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = AppConfig::load();

    // Resolve database path: CLI > config > XDG default
    let db_path = cli.db_path
        .or(config.db_path.clone())
        .unwrap_or_else(matcherdb::config::default_db_path);
    log::info!("Database: {}", db_path.display());

    let db = Database::open(&db_path)
        .context("Failed to open database")?;

    match cli.command {
        Commands::Offset { file } => {
            match matcherdb::matcher::find_end_offset(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?
            {
                Some(offset) => println!("{}", offset),
                None => anyhow::bail!("No end-of-entries marker in {}", file.display()),
            }
        }

        Commands::Decode { file, offset, json } => {
            let end_offset = match offset {
                Some(offset) => offset,
                None => matcherdb::matcher::find_end_offset(&file)?
                    .with_context(|| format!("No end-of-entries marker in {}", file.display()))?,
            };
            let tracks = matcherdb::matcher::decode_file(&file, end_offset)
                .with_context(|| format!("Failed to decode {}", file.display()))?;
            let refs: Vec<&MatcherTrack> = tracks.iter().collect();
            print_tracks(&refs, json)?;
        }

        Commands::Catalog { sources, search, rescan, json } => {
            if rescan {
                db.clear_known_offsets().context("Failed to clear offsets")?;
            }
            let tracks = load_catalogue(db, &config, sources)?;
            let matches = catalog::search_tracks(&tracks, search.as_deref().unwrap_or(""));
            print_tracks(&matches, json)?;
        }

        Commands::Artists { sources, search, artist } => {
            let tracks = load_catalogue(db, &config, sources)?;
            match artist {
                Some(artist) => {
                    let by_artist = catalog::tracks_by_artist(&tracks, &artist);
                    if by_artist.is_empty() {
                        println!("No tracks by {:?}", artist);
                    }
                    for t in by_artist {
                        println!("{}", t.track);
                    }
                }
                None => {
                    let names = catalog::artists(&tracks);
                    for name in catalog::search_artists(&names, search.as_deref().unwrap_or("")) {
                        println!("{}", name);
                    }
                }
            }
        }

        Commands::Shards { dir, force, search, jobs, json } => {
            let dir = dir.unwrap_or_else(|| config.shard_tracks_dir());
            let workers = if jobs > 0 { jobs } else { config.resolve_workers() };
            let load = matcherdb::shard::load_shard_tracks(&db, &dir, workers, force)
                .context("Failed to load shard tracks")?;
            if let ShardLoad::Incomplete { failed } = &load {
                anyhow::bail!("Shard files could not be decoded: {}", failed.join(", "));
            }
            let term = search.as_deref().unwrap_or("").trim().to_lowercase();
            let matches: Vec<&ShardTrack> = load
                .tracks()
                .iter()
                .filter(|t| term.is_empty() || t.track_name.to_lowercase().contains(&term))
                .collect();
            if json {
                println!("{}", serde_json::to_string_pretty(&matches)?);
            } else {
                print_shard_table(&matches);
            }
        }

        Commands::ClearCache { offsets } => {
            db.clear_shard_tracks().context("Failed to clear shard cache")?;
            if offsets {
                db.clear_known_offsets().context("Failed to clear offsets")?;
            }
            println!("Cache cleared");
        }

        Commands::Version { name, manifests } => {
            let dir = manifests.unwrap_or_else(|| config.manifests_dir());
            let version = matcherdb::superpacks::superpack_version(&dir, &name);
            if version == 0 {
                println!("{}: not installed", name);
            } else {
                println!("{}: {}", name, version);
            }
        }

        Commands::Stats => {
            let stats = db.stats().context("Failed to get stats")?;
            println!("Cache Statistics");
            println!("================");
            println!("Shard tracks:     {}", stats.shard_tracks);
            println!("Linear tracks:    {}", stats.linear_tracks);
            println!("Artists:          {}", stats.artists);
            println!("Known offsets:    {}", stats.known_offsets);
            println!(
                "Populated at:     {}",
                stats.populated_at.as_deref().unwrap_or("never")
            );
        }
    }

    Ok(())
}

/// Run a full catalogue load, drawing its progress, and return the tracks.
fn load_catalogue(db: Database, config: &AppConfig, args: SourceArgs) -> Result<Arc<Vec<MatcherTrack>>> {
    let sources = CatalogSources {
        core_matcher: args.core.or_else(|| config.core_matcher_path.clone()),
        core_end_offset: args.core_offset.or(config.core_end_offset),
        superpacks_dir: args.superpacks.unwrap_or_else(|| config.superpacks_dir()),
        jobs: if args.jobs > 0 { args.jobs } else { config.resolve_workers() },
    };
    let loader = CatalogLoader::new(db, sources);
    let updates = loader.subscribe();
    let (done_tx, done_rx) = bounded::<()>(1);

    let outcome = std::thread::scope(|s| {
        s.spawn(|| draw_progress(&updates, &done_rx));
        let outcome = loader.reload(false);
        done_tx.send(()).ok();
        outcome
    });

    match outcome {
        ReloadOutcome::Finished(report) if !report.is_complete() => anyhow::bail!(
            "Catalogue incomplete, failed to load: {}",
            report.failed_files.join(", ")
        ),
        ReloadOutcome::Finished(report) => {
            log::info!(
                "{} tracks from {} files ({} offsets located)",
                report.catalogue_len,
                report.files,
                report.newly_located_offsets
            );
        }
        other => anyhow::bail!("Catalogue load did not finish: {:?}", other),
    }

    loader
        .state()
        .tracks()
        .cloned()
        .context("Catalogue is not loaded")
}

fn draw_progress(updates: &Receiver<LoadState>, done: &Receiver<()>) {
    let pb = ProgressBar::new(100);
    if let Ok(style) = ProgressStyle::with_template(
        "{spinner:.green} [{bar:40.cyan/blue}] {pos}% ({eta}) {msg}",
    ) {
        pb.set_style(style.progress_chars("#>-"));
    }

    let mut apply = |state: LoadState| {
        match state {
            LoadState::Loading(percent) => pb.set_position(percent as u64),
            LoadState::Sorting => pb.set_position(100),
            _ => {}
        }
        pb.set_message(state.label());
    };

    loop {
        select! {
            recv(updates) -> msg => match msg {
                Ok(state) => {
                    let finished = state.is_terminal();
                    apply(state);
                    if finished {
                        break;
                    }
                }
                Err(_) => break,
            },
            recv(done) -> _ => break,
        }
    }
    updates.try_iter().for_each(&mut apply);
    pb.finish_and_clear();
}

fn print_tracks(tracks: &[&MatcherTrack], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(tracks)?);
        return Ok(());
    }
    println!("{:<40} {}", "Track", "Artist");
    println!("{}", "-".repeat(80));
    for t in tracks {
        println!("{:<40} {}", truncate(&t.track, 40), t.artist);
    }
    println!();
    println!("{} tracks", tracks.len());
    Ok(())
}

/// Print a table of shard tracks.
fn print_shard_table(tracks: &[&ShardTrack]) {
    println!(
        "{:<35} {:<25} {:<25} {:>4} {:>3}",
        "Track", "Artist", "Album", "Year", "Lin"
    );
    println!("{}", "-".repeat(97));

    for t in tracks {
        println!(
            "{:<35} {:<25} {:<25} {:>4} {:>3}",
            truncate(&t.track_name, 35),
            truncate(&t.artist, 25),
            truncate(t.album.as_deref().unwrap_or(""), 25),
            t.year.map(|y| y.to_string()).unwrap_or_default(),
            if t.is_linear { "yes" } else { "" },
        );
    }

    println!();
    println!("{} tracks", tracks.len());
}

/// Truncate long titles on a char boundary.
fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() > width {
        let head: String = s.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        s.to_string()
    }
}
