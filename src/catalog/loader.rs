use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, unbounded};

use super::{Aggregation, LoadState};
use crate::db::Database;
use crate::db::models::KnownOffset;
use crate::matcher::{MatcherTrack, OffsetResolver, decode_file};
use crate::superpacks::{self, SuperpackFile, for_each_superpack, progress_percent, worker_pool};

/// Where the matcher files for a catalogue come from.
#[derive(Debug, Clone)]
pub struct CatalogSources {
    /// Bundled matcher; tolerated if absent.
    pub core_matcher: Option<PathBuf>,
    /// Known end offset for the core matcher, skipping the scan.
    pub core_end_offset: Option<u64>,
    pub superpacks_dir: PathBuf,
    /// Decode workers, 0 for rayon's default.
    pub jobs: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// Already loaded or loading, and not forced.
    Skipped,
    /// A newer reload started while this one ran; its result was dropped.
    Superseded,
    Finished(LoadReport),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub files: usize,
    pub failed_files: Vec<String>,
    /// Records decoded from files that succeeded, before dedup.
    pub retained_tracks: usize,
    /// Size of the published catalogue; 0 when incomplete.
    pub catalogue_len: usize,
    pub newly_located_offsets: usize,
}

impl LoadReport {
    pub fn is_complete(&self) -> bool {
        self.failed_files.is_empty()
    }
}

/// Owns the catalogue state machine and runs loads against the cache database.
///
/// Loads are serialized on the database lock. Every accepted `reload` bumps a
/// generation counter; a run that finds its generation stale publishes
/// nothing and writes nothing.
pub struct CatalogLoader {
    sources: CatalogSources,
    db: Mutex<Database>,
    state: Mutex<LoadState>,
    generation: AtomicU64,
    subscribers: Mutex<Vec<Sender<LoadState>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CatalogLoader {
    pub fn new(db: Database, sources: CatalogSources) -> Self {
        Self {
            sources,
            db: Mutex::new(db),
            state: Mutex::new(LoadState::Idle),
            generation: AtomicU64::new(0),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> LoadState {
        lock(&self.state).clone()
    }

    /// Receive every state change from now on, starting with the current state.
    pub fn subscribe(&self) -> Receiver<LoadState> {
        let (tx, rx) = unbounded();
        let state = lock(&self.state);
        tx.send(state.clone()).ok();
        lock(&self.subscribers).push(tx);
        rx
    }

    /// Run `f` with the cache database once no load is using it.
    pub fn with_database<R>(&self, f: impl FnOnce(&Database) -> R) -> R {
        f(&lock(&self.db))
    }

    /// Start a load unless one is loaded or in flight; `force` always starts one.
    ///
    /// Blocks until this load finishes or is found to be superseded.
    pub fn reload(&self, force: bool) -> ReloadOutcome {
        let generation = {
            let mut state = lock(&self.state);
            if !force && (matches!(*state, LoadState::Loaded(_)) || state.is_in_flight()) {
                log::debug!("Catalogue {}, not reloading", state.label());
                return ReloadOutcome::Skipped;
            }
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            self.transition(&mut state, LoadState::StartLoading);
            generation
        };

        let db = lock(&self.db);
        if !self.is_current(generation) {
            return ReloadOutcome::Superseded;
        }
        self.load(&db, generation)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn transition(&self, state: &mut LoadState, next: LoadState) {
        *state = next.clone();
        lock(&self.subscribers).retain(|tx| tx.send(next.clone()).is_ok());
    }

    fn publish_if_current(&self, generation: u64, next: LoadState) -> bool {
        let mut state = lock(&self.state);
        if !self.is_current(generation) {
            return false;
        }
        self.transition(&mut state, next);
        true
    }

    /// Tasks start out of order; only move the percentage forward.
    fn publish_progress(&self, generation: u64, percent: u8) {
        let mut state = lock(&self.state);
        if !self.is_current(generation) {
            return;
        }
        if let LoadState::Loading(current) = *state {
            if current >= percent {
                return;
            }
        }
        self.transition(&mut state, LoadState::Loading(percent));
    }

    fn load(&self, db: &Database, generation: u64) -> ReloadOutcome {
        let started = Instant::now();

        let files = match superpacks::enumerate(
            self.sources.core_matcher.as_deref(),
            &self.sources.superpacks_dir,
        ) {
            Ok(files) => files,
            Err(e) => {
                log::warn!("Could not list superpacks: {}", e);
                return self.finish_incomplete(generation, 0, vec![self.sources.superpacks_dir.display().to_string()]);
            }
        };
        let pool = match worker_pool(self.sources.jobs) {
            Ok(pool) => pool,
            Err(e) => {
                log::warn!("Could not start decode workers: {}", e);
                return self.finish_incomplete(generation, files.len(), files.iter().map(|f| f.name()).collect());
            }
        };

        let resolver = self.offset_resolver(db);
        log::info!("Loading catalogue from {} matcher files", files.len());

        let run = for_each_superpack(&pool, &files, |file, index, total| {
            self.publish_progress(generation, progress_percent(index, total));
            decode_superpack(&resolver, file)
        });

        if !self.is_current(generation) {
            log::debug!("Load {} superseded, dropping results", generation);
            return ReloadOutcome::Superseded;
        }

        let mut located = Vec::new();
        let aggregation = Aggregation::from_run(run.map(|_, decoded| {
            located.extend(decoded.located);
            decoded.tracks
        }));

        if let Err(e) = db.store_known_offsets(&located) {
            log::warn!("Could not remember matcher offsets: {}", e);
        }

        let mut report = LoadReport {
            files: aggregation.files.len(),
            failed_files: aggregation.failed_files().into_iter().map(String::from).collect(),
            retained_tracks: aggregation.retained_tracks(),
            catalogue_len: 0,
            newly_located_offsets: located.len(),
        };

        if !aggregation.is_complete() {
            log::warn!(
                "Catalogue incomplete: {} of {} files failed ({})",
                report.failed_files.len(),
                report.files,
                report.failed_files.join(", ")
            );
            if !self.publish_if_current(generation, LoadState::IncompleteDatabases) {
                return ReloadOutcome::Superseded;
            }
            return ReloadOutcome::Finished(report);
        }

        if !self.publish_if_current(generation, LoadState::Sorting) {
            return ReloadOutcome::Superseded;
        }
        let catalogue = aggregation.into_catalogue();
        report.catalogue_len = catalogue.len();
        if !self.publish_if_current(generation, LoadState::Loaded(Arc::new(catalogue))) {
            return ReloadOutcome::Superseded;
        }

        log::info!(
            "Found {} distinct tracks ({} decoded) in {}ms",
            report.catalogue_len,
            report.retained_tracks,
            started.elapsed().as_millis()
        );
        ReloadOutcome::Finished(report)
    }

    fn finish_incomplete(&self, generation: u64, files: usize, failed_files: Vec<String>) -> ReloadOutcome {
        if !self.publish_if_current(generation, LoadState::IncompleteDatabases) {
            return ReloadOutcome::Superseded;
        }
        ReloadOutcome::Finished(LoadReport {
            files,
            failed_files,
            retained_tracks: 0,
            catalogue_len: 0,
            newly_located_offsets: 0,
        })
    }

    fn offset_resolver(&self, db: &Database) -> OffsetResolver {
        let mut resolver = OffsetResolver::from_db(db).unwrap_or_else(|e| {
            log::warn!("Could not read remembered offsets: {}", e);
            OffsetResolver::default()
        });
        if let (Some(core), Some(end_offset)) = (&self.sources.core_matcher, self.sources.core_end_offset) {
            resolver = resolver.with_core_override(core, end_offset);
        }
        resolver
    }
}

struct DecodedSuperpack {
    tracks: Vec<MatcherTrack>,
    located: Option<KnownOffset>,
}

/// Locate and decode one matcher file. Any failure counts the file as failed.
fn decode_superpack(resolver: &OffsetResolver, file: &SuperpackFile) -> Option<DecodedSuperpack> {
    let name = file.name();
    let resolved = match resolver.resolve(&file.path) {
        Ok(resolved) => resolved,
        Err(e) => {
            log::warn!("{}: {}", name, e);
            return None;
        }
    };
    match decode_file(&file.path, resolved.end_offset) {
        Ok(tracks) => Some(DecodedSuperpack {
            tracks,
            located: resolved.to_known(&file.path),
        }),
        Err(e) => {
            log::warn!("{}: {}", name, e);
            None
        }
    }
}
