// src/ingest/catalog.rs
use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::ingest::types::SourceRepository;
use crate::model::{Source, SourceId};

const ENV_PATH: &str = "SIGNAL_BRIEF_SOURCES";

#[derive(serde::Deserialize)]
struct TomlCatalog {
    #[serde(default)]
    sources: Vec<Source>,
}

/// Load the source catalog from an explicit path. Supports TOML or JSON formats.
pub fn load_sources_from(path: &Path) -> Result<Vec<Source>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading source catalog from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_sources(&content, ext.as_str())
}

/// Load the catalog using env var + fallbacks:
/// 1) $SIGNAL_BRIEF_SOURCES
/// 2) config/sources.toml
/// 3) config/sources.json
pub fn load_sources_default() -> Result<Vec<Source>> {
    if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_sources_from(&pb);
        }
        return Err(anyhow!("{ENV_PATH} points to non-existent path"));
    }
    let toml_p = PathBuf::from("config/sources.toml");
    if toml_p.exists() {
        return load_sources_from(&toml_p);
    }
    let json_p = PathBuf::from("config/sources.json");
    if json_p.exists() {
        return load_sources_from(&json_p);
    }
    Ok(Vec::new())
}

fn parse_sources(s: &str, hint_ext: &str) -> Result<Vec<Source>> {
    if hint_ext == "json" || s.trim_start().starts_with('[') {
        let v: Vec<Source> = serde_json::from_str(s).context("parsing json source catalog")?;
        return Ok(clean_sources(v));
    }
    let v: TomlCatalog = toml::from_str(s).context("parsing toml source catalog")?;
    Ok(clean_sources(v.sources))
}

/// Trim ids, drop entries without id or url, first definition of an id wins.
fn clean_sources(items: Vec<Source>) -> Vec<Source> {
    let mut by_id: BTreeMap<SourceId, Source> = BTreeMap::new();
    for mut s in items {
        s.id = s.id.trim().to_string();
        s.feed_url = s.feed_url.trim().to_string();
        s.section = s.section.trim().to_string();
        if s.id.is_empty() || s.feed_url.is_empty() || s.section.is_empty() {
            tracing::warn!(target: "ingest", source = %s.id, "catalog entry missing id, url or section; skipped");
            continue;
        }
        s.weight = if s.weight.is_finite() {
            s.weight.clamp(0.0, 1.0)
        } else {
            0.5
        };
        by_id.entry(s.id.clone()).or_insert(s);
    }
    by_id.into_values().collect()
}

/// Catalog held in memory; health writes land on the stored records.
#[derive(Default)]
pub struct InMemorySourceRepository {
    sources: Mutex<BTreeMap<SourceId, Source>>,
}

impl InMemorySourceRepository {
    pub fn new(sources: Vec<Source>) -> Self {
        let map = sources.into_iter().map(|s| (s.id.clone(), s)).collect();
        Self {
            sources: Mutex::new(map),
        }
    }

    pub fn get(&self, id: &str) -> Option<Source> {
        self.sources.lock().get(id).cloned()
    }

    pub fn all(&self) -> Vec<Source> {
        self.sources.lock().values().cloned().collect()
    }
}

#[async_trait::async_trait]
impl SourceRepository for InMemorySourceRepository {
    async fn list_fetchable_sources(&self) -> Result<Vec<Source>, StoreError> {
        Ok(self
            .sources
            .lock()
            .values()
            .filter(|s| s.is_active)
            .cloned()
            .collect())
    }

    async fn persist_health(&self, source: &Source) -> Result<(), StoreError> {
        let mut g = self.sources.lock();
        match g.get_mut(&source.id) {
            Some(stored) => {
                stored.health = source.health.clone();
                Ok(())
            }
            None => Err(StoreError::Unavailable(format!("unknown source {}", source.id))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn toml_and_json_catalogs_are_cleaned() {
        let toml = r#"
[[sources]]
id = " reuters "
name = "Reuters"
feed_url = "https://feeds.test/reuters"
section = "market"
weight = 1.7

[[sources]]
id = "reuters"
name = "dup"
feed_url = "https://feeds.test/other"
section = "market"

[[sources]]
id = "nourl"
name = "No url"
feed_url = ""
section = "market"
"#;
        let out = parse_sources(toml, "toml").unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "reuters");
        assert_eq!(out[0].weight, 1.0);
        assert!(out[0].is_active);

        let json = r#"[{"id":"ap","name":"AP","feed_url":"https://feeds.test/ap","section":"general_news_us","is_active":false}]"#;
        let out = parse_sources(json, "json").unwrap();
        assert_eq!(out.len(), 1);
        assert!(!out[0].is_active);
        assert_eq!(out[0].weight, 0.5);
    }

    #[serial_test::serial]
    #[test]
    fn default_uses_env_then_fallbacks() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();
        env::remove_var(ENV_PATH);

        assert!(load_sources_default().unwrap().is_empty());

        fs::create_dir_all("config").unwrap();
        fs::write(
            "config/sources.json",
            r#"[{"id":"a","name":"A","feed_url":"https://a.test","section":"science"}]"#,
        )
        .unwrap();
        assert_eq!(load_sources_default().unwrap().len(), 1);

        env::set_var(ENV_PATH, tmp.path().join("missing.toml"));
        assert!(load_sources_default().is_err());
        env::remove_var(ENV_PATH);

        env::set_current_dir(old).unwrap();
    }

    #[tokio::test]
    async fn repository_lists_active_and_stores_health() {
        let mut off = Source::new("b", "B", "https://b.test", "science");
        off.is_active = false;
        let repo = InMemorySourceRepository::new(vec![
            Source::new("a", "A", "https://a.test", "science"),
            off,
        ]);
        let listed = repo.list_fetchable_sources().await.unwrap();
        assert_eq!(listed.len(), 1);

        let mut a = listed[0].clone();
        a.health.consecutive_failures = 2;
        repo.persist_health(&a).await.unwrap();
        assert_eq!(repo.get("a").unwrap().health.consecutive_failures, 2);

        let ghost = Source::new("zz", "Z", "https://z.test", "science");
        assert!(repo.persist_health(&ghost).await.is_err());
    }
}
