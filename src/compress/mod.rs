//! Compressor: groups each section's articles into topical clusters.
//!
//! Two articles are linked when their TF-IDF cosine similarity is strictly
//! above the threshold; clusters are the connected components of that graph
//! (so A~B and B~C put A, B and C together even when A and C are far apart).

pub mod tfidf;

use std::cmp::Ordering;
use std::collections::BTreeMap;

use metrics::counter;
use serde::{Deserialize, Serialize};

use crate::model::{ArticleIndex, Cluster, NormalizedArticle, SectionKey};
use crate::normalize::NormalizeOutput;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressConfig {
    pub similarity_threshold: f64,
    pub max_clusters_per_section: usize,
    pub keywords_per_cluster: usize,
}

impl Default for CompressConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.35,
            max_clusters_per_section: 15,
            keywords_per_cluster: 3,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompressOutput {
    /// Per section, largest cluster first.
    pub sections: BTreeMap<SectionKey, Vec<Cluster>>,
    /// Every article that went in, clustered or not.
    pub articles: ArticleIndex,
    pub clusters_dropped: usize,
}

impl CompressOutput {
    pub fn cluster_count(&self) -> usize {
        self.sections.values().map(Vec::len).sum()
    }
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = x;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    /// The smaller index becomes the root, so roots do not depend on edge order.
    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}

/// Connected components of the graph with an edge wherever `sim(i, j) > threshold`.
///
/// Each component is sorted ascending; components are ordered by their smallest
/// index. Every index in `0..n` lands in exactly one component.
pub fn cluster_by_similarity<F>(n: usize, sim: F, threshold: f64) -> Vec<Vec<usize>>
where
    F: Fn(usize, usize) -> f64,
{
    let mut uf = UnionFind::new(n);
    for i in 0..n {
        for j in (i + 1)..n {
            if sim(i, j) > threshold {
                uf.union(i, j);
            }
        }
    }
    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for i in 0..n {
        let root = uf.find(i);
        groups.entry(root).or_default().push(i);
    }
    groups.into_values().collect()
}

/// Longest text, then earliest publication (undated last), then higher source
/// weight, then smallest id.
fn representative_order(a: &NormalizedArticle, b: &NormalizedArticle) -> Ordering {
    b.clean_text
        .chars()
        .count()
        .cmp(&a.clean_text.chars().count())
        .then_with(|| match (a.published_at, b.published_at) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| b.source_weight.total_cmp(&a.source_weight))
        .then_with(|| a.id.cmp(&b.id))
}

pub struct Compressor {
    cfg: CompressConfig,
}

impl Compressor {
    pub fn new(cfg: CompressConfig) -> Self {
        Self { cfg }
    }

    pub fn run(&self, input: NormalizeOutput) -> CompressOutput {
        let mut out = CompressOutput::default();

        for (section, mut articles) in input.sections {
            // Stable indices: id order, independent of how the input was sorted.
            articles.sort_by(|a, b| a.id.cmp(&b.id));
            let (clusters, dropped) = self.cluster_section(&section, &articles);
            tracing::debug!(
                target: "compress",
                section = %section,
                articles = articles.len(),
                clusters = clusters.len(),
                dropped,
                "section clustered"
            );
            out.clusters_dropped += dropped;
            if !clusters.is_empty() {
                out.sections.insert(section, clusters);
            }
            for a in articles {
                out.articles.insert(a.id.clone(), a);
            }
        }

        counter!("compress_clusters_total").increment(out.cluster_count() as u64);
        out
    }

    /// Expects `articles` sorted by id. Returns the kept clusters and how many
    /// overflowed the section cap.
    fn cluster_section(&self, section: &str, articles: &[NormalizedArticle]) -> (Vec<Cluster>, usize) {
        if articles.is_empty() {
            return (Vec::new(), 0);
        }
        let docs: Vec<String> = articles
            .iter()
            .map(|a| format!("{} {}", a.title, a.clean_text))
            .collect();
        let doc_refs: Vec<&str> = docs.iter().map(String::as_str).collect();
        let model = tfidf::TfIdf::fit(&doc_refs);

        let mut components = cluster_by_similarity(
            articles.len(),
            |i, j| model.cosine(i, j),
            self.cfg.similarity_threshold,
        );
        // Components are sorted, so `c[0]` is the smallest member (and smallest id).
        components.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a[0].cmp(&b[0])));

        let cap = self.cfg.max_clusters_per_section.max(1);
        let dropped = components.len().saturating_sub(cap);
        components.truncate(cap);

        let clusters = components
            .into_iter()
            .map(|members| {
                let representative = members
                    .iter()
                    .map(|&i| &articles[i])
                    .min_by(|a, b| representative_order(a, b))
                    .map(|a| a.id.clone())
                    .unwrap_or_default();
                let ids: Vec<String> = members.iter().map(|&i| articles[i].id.clone()).collect();
                Cluster {
                    id: format!("{section}/{}", ids[0]),
                    section: section.to_string(),
                    size: ids.len(),
                    keywords: model.top_terms(&members, self.cfg.keywords_per_cluster),
                    members: ids,
                    representative,
                    threshold: self.cfg.similarity_threshold,
                }
            })
            .collect();
        (clusters, dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn art(id: &str, text: &str, weight: f32, hour: Option<u32>) -> NormalizedArticle {
        NormalizedArticle {
            id: id.into(),
            source_id: "s".into(),
            section: "ai_news".into(),
            title: String::new(),
            link: None,
            clean_text: text.into(),
            fingerprint: id.into(),
            simhash: 0,
            published_at: hour.map(|h| Utc.with_ymd_and_hms(2026, 3, 3, h, 0, 0).unwrap()),
            fetched_at: Utc.with_ymd_and_hms(2026, 3, 3, 0, 0, 0).unwrap(),
            source_weight: weight,
            word_count: text.split_whitespace().count(),
            entities: vec![],
            duplicate_count: 0,
        }
    }

    #[test]
    fn threshold_is_strict() {
        let comps = cluster_by_similarity(2, |_, _| 0.5, 0.5);
        assert_eq!(comps, vec![vec![0], vec![1]]);
    }

    #[test]
    fn representative_tie_breaks() {
        // Same length: earlier publish wins over weight.
        let a = art("a", "same len", 0.1, Some(5));
        let b = art("b", "same len", 0.9, Some(2));
        assert_eq!(representative_order(&b, &a), Ordering::Less);
        // Same length and time: weight.
        let c = art("c", "same len", 0.9, Some(5));
        assert_eq!(representative_order(&c, &a), Ordering::Less);
        // Undated loses to dated.
        let d = art("d", "same len", 1.0, None);
        assert_eq!(representative_order(&a, &d), Ordering::Less);
        // Longer text beats everything.
        let e = art("e", "a much longer text", 0.0, None);
        assert_eq!(representative_order(&e, &b), Ordering::Less);
    }

    #[test]
    fn section_cap_drops_smallest_components() {
        let mut input = NormalizeOutput::default();
        input.sections.insert(
            "ai_news".into(),
            vec![
                art("a", "alpha beta gamma", 0.5, None),
                art("b", "delta epsilon zeta", 0.5, None),
                art("c", "eta theta iota", 0.5, None),
            ],
        );
        let c = Compressor::new(CompressConfig {
            max_clusters_per_section: 2,
            ..CompressConfig::default()
        });
        let out = c.run(input);
        assert_eq!(out.clusters_dropped, 1);
        let ids: Vec<_> = out.sections["ai_news"].iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["ai_news/a", "ai_news/b"]);
        assert_eq!(out.articles.len(), 3);
    }
}
