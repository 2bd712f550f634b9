//! Platform registry: platform name to runnable pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use adsync_engine::pipeline::{PlatformAdapter, PlatformPipeline, TableRunner};
use adsync_engine::token::TokenProvider;
use adsync_engine::StepRegistry;
use adsync_sink::DataSink;
use adsync_types::EtlError;

use crate::specs;

/// Builds pipelines for the shipped platforms with one adapter per
/// platform injected at assembly time.
pub struct PlatformRegistry {
    adapters: HashMap<String, Arc<dyn PlatformAdapter>>,
    token_provider: Option<Arc<dyn TokenProvider>>,
}

impl PlatformRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
            token_provider: None,
        }
    }

    /// Register the adapter used for one platform's extraction.
    #[must_use]
    pub fn with_adapter(mut self, platform: &str, adapter: Arc<dyn PlatformAdapter>) -> Self {
        self.adapters.insert(platform.to_string(), adapter);
        self
    }

    /// Register one adapter for every shipped platform (fixture runs).
    #[must_use]
    pub fn with_shared_adapter(mut self, adapter: &Arc<dyn PlatformAdapter>) -> Self {
        for name in specs::platform_names() {
            self.adapters.insert(name.to_string(), Arc::clone(adapter));
        }
        self
    }

    #[must_use]
    pub fn with_token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    /// Build the pipeline for one platform.
    ///
    /// # Errors
    ///
    /// Returns a config error for unknown platforms, a platform without a
    /// registered adapter, or an invalid table spec.
    pub fn build_pipeline(
        &self,
        platform: &str,
        sink: &Arc<dyn DataSink>,
        steps: &StepRegistry,
    ) -> Result<Arc<dyn PlatformPipeline>, EtlError> {
        let spec = specs::spec_for(platform)?;
        let adapter = self.adapters.get(platform).cloned().ok_or_else(|| {
            EtlError::config(
                "NO_ADAPTER",
                format!("no adapter registered for platform '{platform}'"),
            )
        })?;
        let runner = TableRunner::new(
            spec,
            adapter,
            Arc::clone(sink),
            steps,
            self.token_provider.clone(),
        )?;
        Ok(Arc::new(runner))
    }

    /// Build pipelines for every platform with a registered adapter.
    ///
    /// # Errors
    ///
    /// Returns the first pipeline construction error.
    pub fn build_all(
        &self,
        sink: &Arc<dyn DataSink>,
        steps: &StepRegistry,
    ) -> Result<HashMap<String, Arc<dyn PlatformPipeline>>, EtlError> {
        let mut pipelines = HashMap::new();
        for platform in self.adapters.keys() {
            pipelines.insert(platform.clone(), self.build_pipeline(platform, sink, steps)?);
        }
        Ok(pipelines)
    }
}

impl Default for PlatformRegistry {
    fn default() -> Self {
        Self::new()
    }
}
