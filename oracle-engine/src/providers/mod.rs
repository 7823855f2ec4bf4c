//! Price providers (§5, §6).
//!
//! A provider is any external price source the aggregator fans a task out
//! to. Providers are registered once at startup and never added to or
//! removed from afterwards.

mod coinbase;

pub use coinbase::CoinbaseProvider;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::constants::MAX_PROVIDERS_PER_CATEGORY;
use crate::errors::OracleError;

#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait Provider: Send + Sync {
    /// Stable identifier used in logs and in `ProviderSample::provider_id`.
    fn id(&self) -> &str;

    /// Fetches the current price for `symbol` as a raw decimal string.
    /// Callers are responsible for applying [`DEFAULT_PROVIDER_TIMEOUT`] —
    /// this method itself does not bound its own latency.
    ///
    /// [`DEFAULT_PROVIDER_TIMEOUT`]: crate::constants::DEFAULT_PROVIDER_TIMEOUT
    async fn fetch(&self, symbol: &str) -> anyhow::Result<String>;
}

/// Maps each chain-enabled category to the providers that serve it.
/// Immutable once built: adding a provider after construction would let a
/// category's set of data sources change mid-run without the chain ever
/// being told.
pub struct ProviderRegistry {
    by_category: HashMap<u32, Vec<Arc<dyn Provider>>>,
}

impl ProviderRegistry {
    pub fn providers_for(&self, category: u32) -> &[Arc<dyn Provider>] {
        self.by_category.get(&category).map(Vec::as_slice).unwrap_or(&[])
    }
}

pub struct ProviderRegistryBuilder {
    by_category: HashMap<u32, Vec<Arc<dyn Provider>>>,
}

impl ProviderRegistryBuilder {
    pub fn new() -> Self {
        Self { by_category: HashMap::new() }
    }

    pub fn register(
        &mut self,
        category: u32,
        provider: Arc<dyn Provider>,
    ) -> Result<(), OracleError> {
        let entry = self.by_category.entry(category).or_default();
        if entry.len() >= MAX_PROVIDERS_PER_CATEGORY {
            return Err(OracleError::Fatal(format!(
                "category {category} already has the maximum of {MAX_PROVIDERS_PER_CATEGORY} providers"
            )));
        }
        entry.push(provider);
        Ok(())
    }

    /// Consumes the builder, requiring every category in `enabled_categories`
    /// to have at least one provider registered.
    pub fn build(self, enabled_categories: &[u32]) -> Result<ProviderRegistry, OracleError> {
        for category in enabled_categories {
            if self.by_category.get(category).map(Vec::len).unwrap_or(0) == 0 {
                return Err(OracleError::Fatal(format!(
                    "chain-enabled category {category} has no registered providers"
                )));
            }
        }
        Ok(ProviderRegistry { by_category: self.by_category })
    }
}

impl Default for ProviderRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubProvider(&'static str);

    #[async_trait]
    impl Provider for StubProvider {
        fn id(&self) -> &str {
            self.0
        }

        async fn fetch(&self, _symbol: &str) -> anyhow::Result<String> {
            Ok("1.0".to_string())
        }
    }

    #[test]
    fn build_fails_when_enabled_category_has_no_provider() {
        let builder = ProviderRegistryBuilder::new();
        let result = builder.build(&[7]);
        assert!(matches!(result, Err(OracleError::Fatal(_))));
    }

    #[test]
    fn build_succeeds_once_every_enabled_category_has_a_provider() {
        let mut builder = ProviderRegistryBuilder::new();
        builder.register(7, Arc::new(StubProvider("alpha"))).unwrap();
        let registry = builder.build(&[7]).unwrap();
        assert_eq!(registry.providers_for(7).len(), 1);
        assert!(registry.providers_for(99).is_empty());
    }

    #[test]
    fn register_rejects_past_the_per_category_cap() {
        let mut builder = ProviderRegistryBuilder::new();
        for i in 0..MAX_PROVIDERS_PER_CATEGORY {
            builder.register(1, Arc::new(StubProvider(Box::leak(i.to_string().into_boxed_str())))).unwrap();
        }
        let result = builder.register(1, Arc::new(StubProvider("overflow")));
        assert!(matches!(result, Err(OracleError::Fatal(_))));
    }
}
