//! The loader is itself a producer factory: it interprets a resource string,
//! finds (or falls back to) a concrete producer, then attaches normalising
//! filters to conform its output to the target profile (spec §4.13, §6.4).

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::factory::Repository;
use crate::producer::Producer;
use crate::profile::Profile;
use crate::service::{Service, ServiceKind};

/// Parsed `loader.dict`: glob → ordered candidate service ids.
#[derive(Default, Clone)]
pub struct Dictionary {
    entries: Vec<(String, Vec<String>)>,
}

impl Dictionary {
    pub fn load_str(text: &str) -> Self {
        let mut entries = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((pattern, rest)) = line.split_once(char::is_whitespace) else { continue };
            let candidates = rest.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
            entries.push((pattern.trim().to_lowercase(), candidates));
        }
        Self { entries }
    }

    pub fn load_path(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Ok(Self::load_str(&std::fs::read_to_string(path)?))
    }

    /// First pattern (in file order) that glob-matches `resource`, with its
    /// candidate list.
    pub fn lookup(&self, resource: &str) -> Option<&[String]> {
        let needle = strip_query(resource).to_lowercase();
        self.entries.iter().find(|(pattern, _)| glob_match(pattern, &needle)).map(|(_, c)| c.as_slice())
    }
}

/// Parsed `loader.ini`: ordered normaliser groups, each an ordered candidate
/// list.
#[derive(Default, Clone)]
pub struct NormaliserTable {
    groups: Vec<(String, Vec<String>)>,
}

impl NormaliserTable {
    pub fn load_str(text: &str) -> Self {
        let mut groups = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((name, rest)) = line.split_once(char::is_whitespace) else { continue };
            let candidates = rest.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
            groups.push((name.trim().to_string(), candidates));
        }
        Self { groups }
    }

    pub fn load_path(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Ok(Self::load_str(&std::fs::read_to_string(path)?))
    }

    pub fn groups(&self) -> &[(String, Vec<String>)] {
        &self.groups
    }
}

fn strip_query(resource: &str) -> &str {
    resource.split('?').next().unwrap_or(resource)
}

/// Shell-style glob: `*` matches any run of characters, `?` matches one.
fn glob_match(pattern: &str, text: &str) -> bool {
    fn rec(p: &[u8], t: &[u8]) -> bool {
        match (p.first(), t.first()) {
            (None, None) => true,
            (Some(b'*'), _) => rec(&p[1..], t) || (!t.is_empty() && rec(p, &t[1..])),
            (Some(b'?'), Some(_)) => rec(&p[1..], &t[1..]),
            (Some(pc), Some(tc)) if pc == tc => rec(&p[1..], &t[1..]),
            _ => false,
        }
    }
    rec(pattern.as_bytes(), text.as_bytes())
}

pub struct Loader {
    dictionary: Dictionary,
    normalisers: NormaliserTable,
    /// Service id the loader falls back to when construction fails
    /// entirely (spec §4.6.3) — registered by whoever wires up the
    /// repository's concrete collaborators.
    fallback_producer_id: String,
}

impl Loader {
    pub fn new(dictionary: Dictionary, normalisers: NormaliserTable, fallback_producer_id: impl Into<String>) -> Self {
        Self { dictionary, normalisers, fallback_producer_id: fallback_producer_id.into() }
    }

    /// Resolve `resource` into a producer, attach normalising filters, and
    /// return it. Never fails outright: exhausting every candidate falls
    /// back to `fallback_producer_id` (spec §4.6.3).
    pub fn resolve(&self, repo: &Repository, profile: &Profile, resource: &str) -> Result<Arc<Mutex<dyn Producer>>> {
        let producer = self.try_resolve(repo, profile, resource).unwrap_or_else(|| {
            tracing::warn!(%resource, "producer construction failed, falling back to test producer");
            repo.factory_producer(profile, &self.fallback_producer_id, None)
        })?;

        self.normalise(repo, profile, &producer)?;
        Ok(producer)
    }

    fn try_resolve(&self, repo: &Repository, profile: &Profile, resource: &str) -> Option<Result<Arc<Mutex<dyn Producer>>>> {
        // 1. explicit `service:arg` prefix.
        if let Some((id, arg)) = resource.split_once(':') {
            if repo.has_producer(id) {
                tracing::info!(%id, "loader matched explicit service prefix");
                return Some(repo.factory_producer(profile, id, Some(arg)));
            }
        }

        // 2. dictionary glob lookup.
        if let Some(candidates) = self.dictionary.lookup(resource) {
            for id in candidates {
                if let Ok(p) = repo.factory_producer(profile, id, Some(resource)) {
                    tracing::info!(%id, %resource, "loader matched dictionary candidate");
                    return Some(Ok(p));
                }
            }
        }

        // 3. fall back to asking the factory for a service named exactly `resource`.
        if repo.has_producer(resource) {
            return Some(repo.factory_producer(profile, resource, None));
        }

        None
    }

    /// Attach normalising filters in the table's group order, tagging each
    /// `_loader` and skipping re-entrant normalisation of already-composed
    /// or already-normalised producers (spec §4.13).
    fn normalise(&self, repo: &Repository, profile: &Profile, producer: &Arc<Mutex<dyn Producer>>) -> Result<()> {
        {
            let guard = producer.lock();
            let kind = guard.kind();
            if matches!(kind, ServiceKind::Tractor | ServiceKind::Chain) {
                return Ok(());
            }
            if guard.properties().get_int("loader_normalized") != 0 {
                return Ok(());
            }
        }

        for (name, candidates) in self.normalisers.groups() {
            if name == "deinterlace" && producer.lock().properties().get_int("progressive") != 0 {
                continue;
            }
            for id in candidates {
                if let Ok(filter) = repo.factory_filter(profile, id, None) {
                    producer.lock().filter_chain_mut().attach_loader(filter);
                    tracing::info!(group = %name, %id, "loader attached normaliser");
                    break;
                }
            }
        }

        producer.lock().properties_write_marker();
        Ok(())
    }
}

/// Small seam so `Loader::normalise` can set the re-entrancy marker without
/// every `Producer` impl needing a bespoke setter.
pub trait MarksNormalized {
    fn properties_write_marker(&mut self);
}

impl MarksNormalized for dyn Producer {
    fn properties_write_marker(&mut self) {
        self.properties_mut().set_int("loader_normalized", 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dictionary_parses_and_matches_glob() {
        // One glob pattern per line (spec §6.4) — candidates are the
        // comma-separated list on the right only.
        let dict = Dictionary::load_str("*.png colour,avformat\n*.mov avformat\n");
        assert_eq!(dict.lookup("clip.PNG?t=1"), Some(&["colour".to_string(), "avformat".to_string()][..]));
        assert_eq!(dict.lookup("clip.mov"), Some(&["avformat".to_string()][..]));
        assert_eq!(dict.lookup("clip.txt"), None);
    }

    #[test]
    fn normaliser_table_preserves_group_order() {
        let table = NormaliserTable::load_str("colorspace bt709\ndeinterlace yadif\nrescale swscale,box\n");
        let groups = table.groups();
        assert_eq!(groups[0].0, "colorspace");
        assert_eq!(groups[1].0, "deinterlace");
        assert_eq!(groups[2].1, vec!["swscale".to_string(), "box".to_string()]);
    }

    #[test]
    fn missing_files_yield_empty_tables() {
        let dict = Dictionary::default();
        assert_eq!(dict.lookup("anything.mp4"), None);
    }
}
