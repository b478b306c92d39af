pub mod loader;
pub mod state;

use std::collections::HashSet;

use crate::matcher::MatcherTrack;
use crate::superpacks::SuperpackRun;

pub use loader::{CatalogLoader, CatalogSources, ReloadOutcome};
pub use state::LoadState;

/// Per-file decode results from one load run, in enumeration order.
#[derive(Debug, Default)]
pub struct Aggregation {
    pub files: Vec<(String, Option<Vec<MatcherTrack>>)>,
}

impl Aggregation {
    pub fn from_run(run: SuperpackRun<Vec<MatcherTrack>>) -> Self {
        Self {
            files: run
                .outcomes
                .into_iter()
                .map(|o| (o.file.name(), o.result))
                .collect(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.files.iter().all(|(_, tracks)| tracks.is_some())
    }

    pub fn failed_files(&self) -> Vec<&str> {
        self.files
            .iter()
            .filter(|(_, tracks)| tracks.is_none())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Records from every file that decoded, whether or not the run completed.
    pub fn retained_tracks(&self) -> usize {
        self.files
            .iter()
            .filter_map(|(_, tracks)| tracks.as_ref())
            .map(Vec::len)
            .sum()
    }

    /// Final catalogue from the files that decoded.
    pub fn into_catalogue(self) -> Vec<MatcherTrack> {
        build_catalogue(self.files.into_iter().filter_map(|(_, t)| t).collect())
    }
}

/// Concatenate per-file records in enumeration order, dedup, then sort.
pub fn build_catalogue(per_file: Vec<Vec<MatcherTrack>>) -> Vec<MatcherTrack> {
    let mut tracks = dedup(per_file.into_iter().flatten().collect());
    sort_by_title(&mut tracks);
    tracks
}

/// Drop records whose normalized key was already seen. First occurrence wins.
pub fn dedup(tracks: Vec<MatcherTrack>) -> Vec<MatcherTrack> {
    let mut seen = HashSet::new();
    tracks
        .into_iter()
        .filter(|t| seen.insert(t.normalized_key()))
        .collect()
}

/// Stable sort by lowercase track title.
pub fn sort_by_title(tracks: &mut [MatcherTrack]) {
    tracks.sort_by_cached_key(|t| t.track.to_lowercase());
}

/// Tracks whose title contains `term`, case-insensitively. A blank term
/// matches everything.
pub fn search_tracks<'a>(tracks: &'a [MatcherTrack], term: &str) -> Vec<&'a MatcherTrack> {
    let term = term.trim().to_lowercase();
    tracks
        .iter()
        .filter(|t| term.is_empty() || t.track.to_lowercase().contains(&term))
        .collect()
}

/// Distinct artist names (case-insensitive, first spelling kept), sorted.
pub fn artists(tracks: &[MatcherTrack]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut names: Vec<String> = tracks
        .iter()
        .filter(|t| seen.insert(t.artist.to_lowercase()))
        .map(|t| t.artist.clone())
        .collect();
    names.sort_by_cached_key(|a| a.to_lowercase().trim().to_string());
    names
}

pub fn search_artists<'a>(artists: &'a [String], term: &str) -> Vec<&'a String> {
    let term = term.trim().to_lowercase();
    artists
        .iter()
        .filter(|a| term.is_empty() || a.to_lowercase().contains(&term))
        .collect()
}

/// Tracks by one artist, matched case-insensitively on the trimmed name.
pub fn tracks_by_artist<'a>(tracks: &'a [MatcherTrack], artist: &str) -> Vec<&'a MatcherTrack> {
    let wanted = artist.trim().to_lowercase();
    tracks
        .iter()
        .filter(|t| t.artist.trim().to_lowercase() == wanted)
        .collect()
}
