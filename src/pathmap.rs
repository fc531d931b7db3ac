//! Server-to-local path mapping.
//!
//! The media servers and this process often see the same files under
//! different mount points. Rules are plain prefix rewrites, tried in file
//! order, first match wins. A prefix only matches on a path component
//! boundary, so `/tv` never rewrites `/tvshows`.
//!
//! ```toml
//! [[series]]
//! from = "/data/tv"
//! to = "/mnt/media/tv"
//!
//! [[movie]]
//! from = "D:\\Movies"
//! to = "/mnt/media/movies"
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::model::audit::MediaKind;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PathRule {
    /// Prefix as the server reports it.
    pub from: String,
    /// Prefix as this process sees it.
    pub to: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathMappings {
    #[serde(default)]
    series: Vec<PathRule>,
    #[serde(default)]
    movie: Vec<PathRule>,
}

impl PathMappings {
    pub fn new(series: Vec<PathRule>, movie: Vec<PathRule>) -> Self {
        Self { series, movie }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read path mappings {}: {e}", path.display()))
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::Config(format!("invalid path mappings: {e}")))
    }

    fn rules(&self, kind: MediaKind) -> &[PathRule] {
        match kind {
            MediaKind::Series => &self.series,
            MediaKind::Movie => &self.movie,
        }
    }

    /// Server path to local path.
    pub fn path_replace(&self, kind: MediaKind, path: &str) -> String {
        rewrite(path, self.rules(kind).iter().map(|r| (r.from.as_str(), r.to.as_str())))
    }

    /// Local path back to the server's view.
    pub fn path_replace_reverse(&self, kind: MediaKind, path: &str) -> String {
        rewrite(path, self.rules(kind).iter().map(|r| (r.to.as_str(), r.from.as_str())))
    }
}

fn rewrite<'a>(path: &str, rules: impl Iterator<Item = (&'a str, &'a str)>) -> String {
    for (from, to) in rules {
        let Some(rest) = strip_dir_prefix(path, from) else {
            continue;
        };
        // Carry the separator style of the target side.
        let sep = if to.contains('\\') && !to.contains('/') { '\\' } else { '/' };
        let rest: String = rest
            .chars()
            .map(|c| if c == '/' || c == '\\' { sep } else { c })
            .collect();
        let to = to.trim_end_matches(['/', '\\']);
        return if rest.is_empty() {
            to.to_string()
        } else {
            format!("{to}{sep}{}", rest.trim_start_matches(sep))
        };
    }
    path.to_string()
}

/// The remainder after `prefix`, if `prefix` ends on a component boundary of `path`.
fn strip_dir_prefix<'p>(path: &'p str, prefix: &str) -> Option<&'p str> {
    let prefix = prefix.trim_end_matches(['/', '\\']);
    if prefix.is_empty() {
        return None;
    }
    let rest = path.strip_prefix(prefix)?;
    (rest.is_empty() || rest.starts_with(['/', '\\'])).then_some(rest)
}
