//! Normalizer: raw feed items to clean, deduplicated, capacity-bounded articles.
//!
//! Dedup runs over the whole run (a wire story syndicated into two sections is
//! kept once). Candidates are visited oldest first so the earliest publication
//! survives; later copies only bump its `duplicate_count`.

pub mod extract;
pub mod simhash;
pub mod text;

use std::collections::{BTreeMap, HashMap};

use metrics::counter;
use serde::{Deserialize, Serialize};

use crate::model::{NormalizedArticle, RawItem, SectionKey, SourceId};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeConfig {
    /// Case-folded title similarity at or above which two items are one story.
    pub title_similarity: f64,
    pub simhash_max_distance: u32,
    /// Shorter texts are too noisy for SimHash and only match by fingerprint/title.
    pub simhash_min_words: usize,
    /// Per-section cap when the section does not set its own.
    pub max_articles_per_section: usize,
    /// Article page fetching ahead of dedup.
    pub extract: extract::ExtractConfig,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            title_similarity: 0.92,
            simhash_max_distance: 3,
            simhash_min_words: 20,
            max_articles_per_section: 40,
            extract: extract::ExtractConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizeOutput {
    /// Per section, most recent first.
    pub sections: BTreeMap<SectionKey, Vec<NormalizedArticle>>,
    pub duplicates: usize,
    pub dropped_capacity: usize,
    pub dropped_empty: usize,
}

impl NormalizeOutput {
    pub fn article_count(&self) -> usize {
        self.sections.values().map(Vec::len).sum()
    }
}

pub struct Normalizer {
    cfg: NormalizeConfig,
    section_caps: HashMap<SectionKey, usize>,
}

impl Normalizer {
    pub fn new(cfg: NormalizeConfig) -> Self {
        Self {
            cfg,
            section_caps: HashMap::new(),
        }
    }

    pub fn with_section_caps(mut self, caps: HashMap<SectionKey, usize>) -> Self {
        self.section_caps = caps;
        self
    }

    fn cap_for(&self, section: &str) -> usize {
        self.section_caps
            .get(section)
            .copied()
            .unwrap_or(self.cfg.max_articles_per_section)
    }

    /// Pure function of its input: the same items and weights give the same output.
    pub fn run(&self, items: &[RawItem], weights: &HashMap<SourceId, f32>) -> NormalizeOutput {
        let mut out = NormalizeOutput::default();

        let mut candidates: Vec<NormalizedArticle> = Vec::with_capacity(items.len());
        for it in items {
            match normalize_item(it, weights) {
                Some(a) => candidates.push(a),
                None => out.dropped_empty += 1,
            }
        }

        // Oldest first, undated last, id as the tie-break.
        candidates.sort_by(|a, b| {
            a.published_at
                .is_none()
                .cmp(&b.published_at.is_none())
                .then_with(|| a.published_at.cmp(&b.published_at))
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut survivors: Vec<NormalizedArticle> = Vec::with_capacity(candidates.len());
        let mut by_fingerprint: HashMap<String, usize> = HashMap::new();
        let mut folded_titles: Vec<String> = Vec::with_capacity(candidates.len());

        for cand in candidates {
            let title = text::fold(&cand.title);
            let hit = by_fingerprint
                .get(&cand.fingerprint)
                .copied()
                .or_else(|| self.find_near_duplicate(&cand, &title, &survivors, &folded_titles));
            match hit {
                Some(idx) => {
                    survivors[idx].duplicate_count += 1 + cand.duplicate_count;
                    out.duplicates += 1;
                    tracing::trace!(target: "normalize", kept = %survivors[idx].id, dropped = %cand.id, "duplicate folded");
                }
                None => {
                    by_fingerprint.insert(cand.fingerprint.clone(), survivors.len());
                    folded_titles.push(title);
                    survivors.push(cand);
                }
            }
        }

        for a in survivors {
            out.sections.entry(a.section.clone()).or_default().push(a);
        }
        for (section, list) in out.sections.iter_mut() {
            list.sort_by(|a, b| {
                b.published_at
                    .is_some()
                    .cmp(&a.published_at.is_some())
                    .then_with(|| b.published_at.cmp(&a.published_at))
                    .then_with(|| a.id.cmp(&b.id))
            });
            let cap = self.cap_for(section);
            if list.len() > cap {
                out.dropped_capacity += list.len() - cap;
                list.truncate(cap);
            }
        }

        counter!("normalize_duplicates_total").increment(out.duplicates as u64);
        out
    }

    fn find_near_duplicate(
        &self,
        cand: &NormalizedArticle,
        cand_title: &str,
        survivors: &[NormalizedArticle],
        folded_titles: &[String],
    ) -> Option<usize> {
        let simhash_eligible = cand.word_count >= self.cfg.simhash_min_words;
        survivors.iter().zip(folded_titles).position(|(s, s_title)| {
            let titles_match = !cand_title.is_empty()
                && !s_title.is_empty()
                && strsim::normalized_levenshtein(cand_title, s_title) >= self.cfg.title_similarity;
            let simhash_match = simhash_eligible
                && s.word_count >= self.cfg.simhash_min_words
                && simhash::hamming(cand.simhash, s.simhash) <= self.cfg.simhash_max_distance;
            titles_match || simhash_match
        })
    }
}

/// `None` when nothing readable is left after cleaning.
fn normalize_item(it: &RawItem, weights: &HashMap<SourceId, f32>) -> Option<NormalizedArticle> {
    let title = text::clean_text(&it.title);
    let body = text::clean_text(&it.body);
    let clean_text = if body.is_empty() { title.clone() } else { body };
    if clean_text.is_empty() {
        return None;
    }
    Some(NormalizedArticle {
        id: it.id.clone(),
        source_id: it.source_id.clone(),
        section: it.section.clone(),
        fingerprint: text::fingerprint(&title, &clean_text),
        simhash: simhash::simhash(&clean_text),
        word_count: text::word_count(&clean_text),
        entities: text::extract_entities(&clean_text),
        title,
        link: it.link.clone(),
        published_at: it.published_at,
        fetched_at: it.fetched_at,
        source_weight: weights.get(&it.source_id).copied().unwrap_or(0.5),
        duplicate_count: 0,
        clean_text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn item(id: &str, section: &str, title: &str, body: &str, hours: Option<i64>) -> RawItem {
        let base = Utc.with_ymd_and_hms(2026, 3, 3, 0, 0, 0).unwrap();
        RawItem {
            id: id.into(),
            source_id: "src".into(),
            section: section.into(),
            title: title.into(),
            link: Some(format!("https://x.test/{id}")),
            body: body.into(),
            published_at: hours.map(|h| base + Duration::hours(h)),
            fetched_at: base,
        }
    }

    #[test]
    fn earliest_copy_survives_and_counts_duplicates() {
        let items = vec![
            item("b", "market", "Fed holds rates", "Same body text", Some(5)),
            item("a", "market", "Fed holds rates", "Same body text", Some(1)),
            item("c", "market", "FED HOLDS RATES!", "Different wording entirely", Some(3)),
        ];
        let out = Normalizer::new(NormalizeConfig::default()).run(&items, &HashMap::new());
        let list = &out.sections["market"];
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, "a");
        assert_eq!(list[0].duplicate_count, 2);
        assert_eq!(out.duplicates, 2);
    }

    #[test]
    fn empty_items_are_dropped() {
        let items = vec![item("a", "market", "  ", "<p> </p>", None)];
        let out = Normalizer::new(NormalizeConfig::default()).run(&items, &HashMap::new());
        assert_eq!(out.dropped_empty, 1);
        assert!(out.sections.is_empty());
    }

    #[test]
    fn capacity_keeps_most_recent() {
        let items = vec![
            item("a", "science", "Comet sighted", "one", Some(1)),
            item("b", "science", "Fusion milestone", "two", Some(9)),
            item("c", "science", "Deep sea survey", "three", None),
        ];
        let caps = HashMap::from([("science".to_string(), 2usize)]);
        let out = Normalizer::new(NormalizeConfig::default())
            .with_section_caps(caps)
            .run(&items, &HashMap::new());
        let ids: Vec<_> = out.sections["science"].iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(out.dropped_capacity, 1);
    }

    #[test]
    fn source_weight_is_attached() {
        let items = vec![item("a", "market", "Oil rises", "Brent up", Some(1))];
        let weights = HashMap::from([("src".to_string(), 0.9f32)]);
        let out = Normalizer::new(NormalizeConfig::default()).run(&items, &weights);
        assert_eq!(out.sections["market"][0].source_weight, 0.9);
    }
}
