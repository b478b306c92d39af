use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use rayon::prelude::*;
use regex::Regex;
use thiserror::Error;
use walkdir::WalkDir;

/// Shard files with this prefix carry auxiliary data, not tracks.
pub const RESERVED_PREFIX: &str = "cc-";

#[derive(Error, Debug)]
pub enum SuperpackError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Worker pool error: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuperpackKind {
    /// The matcher bundled with the recognition service.
    Core,
    /// A downloaded pack.
    Shard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperpackFile {
    pub path: PathBuf,
    pub kind: SuperpackKind,
}

impl SuperpackFile {
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// List the files a load run covers: the core matcher first (when present),
/// then the shard files in `shard_dir` sorted by name.
///
/// A missing core file or shard directory is not an error.
pub fn enumerate(core: Option<&Path>, shard_dir: &Path) -> Result<Vec<SuperpackFile>, SuperpackError> {
    let mut files = Vec::new();

    match core {
        Some(path) if path.is_file() => files.push(SuperpackFile {
            path: path.to_path_buf(),
            kind: SuperpackKind::Core,
        }),
        Some(path) => log::debug!("Core matcher {} not present, skipping", path.display()),
        None => {}
    }

    if !shard_dir.is_dir() {
        log::debug!("Superpack directory {} not present", shard_dir.display());
        return Ok(files);
    }

    for entry in WalkDir::new(shard_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.file_name().to_string_lossy().starts_with(RESERVED_PREFIX) {
            log::trace!("Skipping auxiliary pack {}", entry.path().display());
            continue;
        }
        files.push(SuperpackFile {
            path: entry.into_path(),
            kind: SuperpackKind::Shard,
        });
    }

    Ok(files)
}

/// Modification time in nanoseconds since the epoch, 0 if unavailable.
pub fn modified_nanos(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Outcome of one per-file task.
#[derive(Debug)]
pub struct FileOutcome<T> {
    pub file: SuperpackFile,
    pub index: usize,
    /// `None` when the task reported failure.
    pub result: Option<T>,
}

/// Outcomes of a run, in enumeration order regardless of completion order.
#[derive(Debug)]
pub struct SuperpackRun<T> {
    pub outcomes: Vec<FileOutcome<T>>,
}

impl<T> SuperpackRun<T> {
    /// True only if every task succeeded. An empty run succeeds.
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_some())
    }

    pub fn failed_files(&self) -> Vec<&SuperpackFile> {
        self.outcomes
            .iter()
            .filter(|o| o.result.is_none())
            .map(|o| &o.file)
            .collect()
    }

    /// Transform every successful result, keeping failures and order.
    pub fn map<U>(self, mut f: impl FnMut(&SuperpackFile, T) -> U) -> SuperpackRun<U> {
        SuperpackRun {
            outcomes: self
                .outcomes
                .into_iter()
                .map(|o| FileOutcome {
                    result: o.result.map(|r| f(&o.file, r)),
                    file: o.file,
                    index: o.index,
                })
                .collect(),
        }
    }

    /// Successful results in enumeration order.
    pub fn into_successes(self) -> Vec<T> {
        self.outcomes.into_iter().filter_map(|o| o.result).collect()
    }
}

/// Build a worker pool for decode tasks. `jobs == 0` uses rayon's default size.
pub fn worker_pool(jobs: usize) -> Result<rayon::ThreadPool, SuperpackError> {
    Ok(rayon::ThreadPoolBuilder::new().num_threads(jobs).build()?)
}

/// Run `per_file(file, index, total)` for every file on `pool`.
///
/// Every task runs to completion; a failure never cancels the others, so
/// whatever the successful tasks produced is kept.
pub fn for_each_superpack<T, F>(
    pool: &rayon::ThreadPool,
    files: &[SuperpackFile],
    per_file: F,
) -> SuperpackRun<T>
where
    T: Send,
    F: Fn(&SuperpackFile, usize, usize) -> Option<T> + Sync,
{
    let total = files.len();
    let results: Vec<Option<T>> = pool.install(|| {
        files
            .par_iter()
            .enumerate()
            .map(|(index, file)| per_file(file, index, total))
            .collect()
    });

    SuperpackRun {
        outcomes: files
            .iter()
            .cloned()
            .zip(results)
            .enumerate()
            .map(|(index, (file, result))| FileOutcome { file, index, result })
            .collect(),
    }
}

/// Enumerate, run `per_file` on every file and report whether all succeeded.
pub fn run<F>(core: Option<&Path>, shard_dir: &Path, jobs: usize, per_file: F) -> Result<bool, SuperpackError>
where
    F: Fn(&SuperpackFile, usize, usize) -> bool + Sync,
{
    let files = enumerate(core, shard_dir)?;
    let pool = worker_pool(jobs)?;
    let run = for_each_superpack(&pool, &files, |file, index, total| {
        per_file(file, index, total).then_some(())
    });
    for failed in run.failed_files() {
        log::warn!("Superpack {} failed", failed.name());
    }
    Ok(run.all_succeeded())
}

/// Progress for the task at `index` of `total`, 0 to 100.
pub fn progress_percent(index: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((index as f64 / total as f64) * 100.0).round().min(100.0) as u8
}

/// Newest installed version of a superpack, from manifest names `{name}-{version}`.
/// Returns 0 when nothing is installed.
pub fn superpack_version(manifest_dir: &Path, superpack_name: &str) -> u32 {
    if !manifest_dir.is_dir() {
        return 0;
    }
    let pattern = format!("^{}-(\\d+)$", regex::escape(superpack_name));
    let re = match Regex::new(&pattern) {
        Ok(re) => re,
        Err(e) => {
            log::warn!("Bad superpack name {:?}: {}", superpack_name, e);
            return 0;
        }
    };

    WalkDir::new(manifest_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            re.captures(&name)
                .and_then(|caps| caps.get(1))
                .and_then(|m| m.as_str().parse::<u32>().ok())
        })
        .max()
        .unwrap_or(0)
}
