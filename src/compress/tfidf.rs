//! Sparse TF-IDF vectors over one section's articles.

use std::collections::BTreeMap;

/// `(term index, weight)`, sorted by term index.
pub type SparseVec = Vec<(usize, f64)>;

const STOP_WORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "been",
    "before", "but", "by", "can", "could", "did", "do", "does", "for", "from", "had", "has",
    "have", "he", "her", "his", "how", "if", "in", "into", "is", "it", "its", "may", "more",
    "most", "new", "no", "not", "of", "on", "one", "or", "other", "our", "out", "over", "said",
    "says", "she", "so", "some", "than", "that", "the", "their", "them", "then", "there",
    "these", "they", "this", "to", "up", "us", "was", "we", "were", "what", "when", "which",
    "while", "who", "will", "with", "would", "you",
];

fn is_stop_word(w: &str) -> bool {
    STOP_WORDS.binary_search(&w).is_ok()
}

/// Lowercase alphanumeric runs of length >= 2, stop words removed.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 2)
        .map(str::to_lowercase)
        .filter(|w| !is_stop_word(w))
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct TfIdf {
    /// Sorted vocabulary; position is the term index.
    pub terms: Vec<String>,
    pub vectors: Vec<SparseVec>,
}

impl TfIdf {
    /// Raw term counts weighted by smoothed idf `ln((1+n)/(1+df)) + 1`, then
    /// L2-normalized. Documents without tokens get an empty vector.
    pub fn fit(docs: &[&str]) -> Self {
        let n = docs.len();
        let tokenized: Vec<Vec<String>> = docs.iter().map(|d| tokenize(d)).collect();

        let mut df: BTreeMap<&str, usize> = BTreeMap::new();
        for toks in &tokenized {
            let mut uniq: Vec<&str> = toks.iter().map(String::as_str).collect();
            uniq.sort_unstable();
            uniq.dedup();
            for t in uniq {
                *df.entry(t).or_insert(0) += 1;
            }
        }

        let terms: Vec<String> = df.keys().map(|t| t.to_string()).collect();
        let index: BTreeMap<&str, usize> = df.keys().enumerate().map(|(i, t)| (*t, i)).collect();
        let idf: Vec<f64> = df
            .values()
            .map(|&d| ((1.0 + n as f64) / (1.0 + d as f64)).ln() + 1.0)
            .collect();

        let vectors = tokenized
            .iter()
            .map(|toks| {
                let mut tf: BTreeMap<usize, f64> = BTreeMap::new();
                for t in toks {
                    if let Some(&i) = index.get(t.as_str()) {
                        *tf.entry(i).or_insert(0.0) += 1.0;
                    }
                }
                let mut v: SparseVec = tf.into_iter().map(|(i, c)| (i, c * idf[i])).collect();
                let norm = v.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
                if norm > 0.0 {
                    for (_, w) in v.iter_mut() {
                        *w /= norm;
                    }
                }
                v
            })
            .collect();

        Self { terms, vectors }
    }

    pub fn cosine(&self, a: usize, b: usize) -> f64 {
        cosine(&self.vectors[a], &self.vectors[b])
    }

    /// Highest-weighted terms of the members' summed vectors; ties by term order.
    pub fn top_terms(&self, members: &[usize], k: usize) -> Vec<String> {
        let mut sum: BTreeMap<usize, f64> = BTreeMap::new();
        for &m in members {
            for &(i, w) in &self.vectors[m] {
                *sum.entry(i).or_insert(0.0) += w;
            }
        }
        let mut ranked: Vec<(usize, f64)> = sum.into_iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked
            .into_iter()
            .take(k)
            .map(|(i, _)| self.terms[i].clone())
            .collect()
    }
}

/// Dot product of two L2-normalized sparse vectors.
pub fn cosine(a: &SparseVec, b: &SparseVec) -> f64 {
    let (mut i, mut j, mut dot) = (0, 0, 0.0);
    while i < a.len() && j < b.len() {
        match a[i].0.cmp(&b[j].0) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                dot += a[i].1 * b[j].1;
                i += 1;
                j += 1;
            }
        }
    }
    dot
}
