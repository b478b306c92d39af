pub mod catalog;
pub mod config;
pub mod db;
pub mod matcher;
pub mod shard;
pub mod superpacks;
pub mod wire;

#[cfg(test)]
pub(crate) mod fixtures;

/// Application name for XDG paths
pub const APP_NAME: &str = "matcherdb";

/// Superpack whose files carry the matcher shards.
pub const SUPERPACK_AMBIENT_MUSIC_INDEX: &str = "ambientmusic-index-17_09_02";
