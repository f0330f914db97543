//! Replica reduction into the global network
//!
//! At every epoch boundary the operator hands the merger one target (the
//! global network) and N worker replicas. The default merger writes the
//! parameter-wise arithmetic mean of the replicas into the target for
//! every parameter matched by its key pattern; unmatched parameters stay
//! untouched.

use crate::backend::ComputationHandler;
use crate::error::Result;
use crate::model::Network;
use crate::registry::RegistryResolver;

/// Default key pattern: every parameter of every layer
pub const DEFAULT_MERGE_PATTERN: &str = "layers.*.*";

/// Reduces worker replicas into one global network
pub trait NetworkMerger: Send {
    /// Update `target` in place from `sources`
    fn merge(
        &self,
        target: &mut dyn Network,
        sources: &[Box<dyn Network>],
        handler: &dyn ComputationHandler,
    ) -> Result<()>;

    /// Resolver pattern selecting the parameters this merger touches
    fn key_pattern(&self) -> &str;
}

/// Parameter-wise arithmetic mean over the key pattern
#[derive(Debug, Clone)]
pub struct AverageMerger {
    pattern: String,
}

impl AverageMerger {
    pub fn new() -> Self {
        Self::with_pattern(DEFAULT_MERGE_PATTERN)
    }

    pub fn with_pattern(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }
}

impl Default for AverageMerger {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkMerger for AverageMerger {
    fn merge(
        &self,
        target: &mut dyn Network,
        sources: &[Box<dyn Network>],
        handler: &dyn ComputationHandler,
    ) -> Result<()> {
        if sources.is_empty() {
            return Ok(());
        }
        let target_view = target.registry();
        let source_views: Vec<_> = sources.iter().map(|s| s.registry()).collect();

        for (key, value) in RegistryResolver::resolve_in(&target_view, &self.pattern) {
            let Some(target_param) = value.as_tensor() else {
                continue;
            };
            let accumulator = handler.create(&target_param.shape());
            let mut found = 0usize;
            for view in &source_views {
                let Some(source_param) = view.get_path(&key).and_then(|v| v.as_tensor().cloned())
                else {
                    log::warn!("merge: source replica missing parameter {key}, skipping replica");
                    continue;
                };
                handler.add(&accumulator, &source_param, &accumulator)?;
                found += 1;
            }
            if found == 0 {
                continue;
            }
            handler.divide_scalar(&accumulator, found as f32, &accumulator)?;
            handler.fill(&accumulator, target_param)?;
        }
        Ok(())
    }

    fn key_pattern(&self) -> &str {
        &self.pattern
    }
}
