use std::collections::{HashMap, HashSet};

use super::ShardTrack;

/// Merge per-file shard tracks into one list.
///
/// Rows sharing a `db_id` are folded into a single best row, then rows with
/// the same shared name are dropped after their first occurrence. Input order
/// (file order, then row order) decides every tie.
pub fn merge(per_file: Vec<Vec<ShardTrack>>) -> Vec<ShardTrack> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<ShardTrack>> = HashMap::new();
    for track in per_file.into_iter().flatten() {
        let group = groups.entry(track.db_id.clone()).or_default();
        if group.is_empty() {
            order.push(track.db_id.clone());
        }
        group.push(track);
    }

    let mut seen = HashSet::new();
    order
        .into_iter()
        .filter_map(|db_id| groups.remove(&db_id))
        .filter_map(create_best)
        .filter(|t| seen.insert(t.shared_name()))
        .collect()
}

/// Fold rows with one `db_id`: identity from the first row, optional
/// metadata from the first row that has it.
fn create_best(group: Vec<ShardTrack>) -> Option<ShardTrack> {
    let player_urls = group
        .iter()
        .find(|t| !t.player_urls.is_empty())
        .map(|t| t.player_urls.clone())
        .unwrap_or_default();
    let album = group.iter().find_map(|t| t.album.clone());
    let year = group.iter().find_map(|t| t.year);
    let is_linear = group.iter().any(|t| t.is_linear);

    let first = group.into_iter().next()?;
    Some(ShardTrack {
        player_urls,
        album,
        year,
        is_linear,
        ..first
    })
}
