//! Side context (market moves, weather, investment thesis) folded into section
//! prompts. Fetched once per run; a provider that fails or is slow is simply
//! left out.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    Market,
    Weather,
    Thesis,
}

impl ContextKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextKind::Market => "market",
            ContextKind::Weather => "weather",
            ContextKind::Thesis => "thesis",
        }
    }
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextBlock {
    pub kind: ContextKind,
    pub title: String,
    pub body: String,
}

#[async_trait::async_trait]
pub trait ContextProvider: Send + Sync {
    fn kind(&self) -> ContextKind;
    async fn fetch(&self) -> anyhow::Result<ContextBlock>;
}

/// Fixed block, e.g. text supplied through configuration.
#[derive(Debug, Clone)]
pub struct StaticContext {
    block: ContextBlock,
}

impl StaticContext {
    pub fn new(kind: ContextKind, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            block: ContextBlock {
                kind,
                title: title.into(),
                body: body.into(),
            },
        }
    }
}

#[async_trait::async_trait]
impl ContextProvider for StaticContext {
    fn kind(&self) -> ContextKind {
        self.block.kind
    }

    async fn fetch(&self) -> anyhow::Result<ContextBlock> {
        if self.block.body.trim().is_empty() {
            anyhow::bail!("{} context is empty", self.block.kind);
        }
        Ok(self.block.clone())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContextBundle {
    pub blocks: BTreeMap<ContextKind, ContextBlock>,
}

impl ContextBundle {
    pub fn get(&self, kind: ContextKind) -> Option<&ContextBlock> {
        self.blocks.get(&kind)
    }
}

/// Query every provider concurrently, each under `timeout`. When two providers
/// share a kind, the first one listed wins.
pub async fn gather_context(providers: &[Arc<dyn ContextProvider>], timeout: Duration) -> ContextBundle {
    let fetches: Vec<BoxFuture<'_, Option<ContextBlock>>> = providers
        .iter()
        .map(|p| {
            async move {
                let kind = p.kind();
                match tokio::time::timeout(timeout, p.fetch()).await {
                    Ok(Ok(block)) if block.kind == kind => Some(block),
                    Ok(Ok(block)) => {
                        tracing::warn!(target: "synthesize", expected = %kind, got = %block.kind, "context kind mismatch; omitted");
                        None
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(target: "synthesize", kind = %kind, error = %e, "context provider failed; omitted");
                        None
                    }
                    Err(_) => {
                        tracing::warn!(target: "synthesize", kind = %kind, "context provider timed out; omitted");
                        None
                    }
                }
            }
            .boxed()
        })
        .collect();
    let results = futures::future::join_all(fetches).await;

    let mut bundle = ContextBundle::default();
    for block in results.into_iter().flatten() {
        bundle.blocks.entry(block.kind).or_insert(block);
    }
    bundle
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Hanging;

    #[async_trait::async_trait]
    impl ContextProvider for Hanging {
        fn kind(&self) -> ContextKind {
            ContextKind::Weather
        }
        async fn fetch(&self) -> anyhow::Result<ContextBlock> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            anyhow::bail!("unreachable")
        }
    }

    #[tokio::test]
    async fn slow_and_empty_providers_are_omitted() {
        let providers: Vec<Arc<dyn ContextProvider>> = vec![
            Arc::new(StaticContext::new(ContextKind::Market, "Markets", "S&P 500 +0.4%")),
            Arc::new(Hanging),
            Arc::new(StaticContext::new(ContextKind::Thesis, "Thesis", "  ")),
        ];
        let bundle = gather_context(&providers, Duration::from_millis(30)).await;
        assert!(bundle.get(ContextKind::Market).is_some());
        assert!(bundle.get(ContextKind::Weather).is_none());
        assert!(bundle.get(ContextKind::Thesis).is_none());
    }
}
