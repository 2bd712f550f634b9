//! Processing pipeline: an ordered chain of named column transformations.
//!
//! Step names are an external contract (platform configs reference them).
//! The registry is open: new steps register without touching existing ones.
//! Unknown names fail at pipeline construction; a failing step reports its
//! name and cause without mutating the caller's payload.

pub mod steps;

use std::collections::HashMap;
use std::sync::Arc;

use adsync_types::{EtlError, Frame};
use tracing::debug;

use crate::config::types::ProcessingStepConfig;

/// Parameters for one step, as declared in the table config.
#[derive(Debug, Clone, Default)]
pub struct StepParams(pub serde_json::Value);

impl StepParams {
    /// A string-list parameter; accepts a single string as a one-item list.
    #[must_use]
    pub fn string_list(&self, key: &str) -> Vec<String> {
        match self.0.get(key) {
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(ToString::to_string))
                .collect(),
            Some(serde_json::Value::String(s)) => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    #[must_use]
    pub fn string(&self, key: &str) -> Option<String> {
        self.0.get(key).and_then(|v| v.as_str()).map(ToString::to_string)
    }

    #[must_use]
    pub fn integer(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(serde_json::Value::as_i64)
    }

    #[must_use]
    pub fn boolean(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(serde_json::Value::as_bool)
    }

    /// A string-to-string map parameter.
    #[must_use]
    pub fn string_map(&self, key: &str) -> Vec<(String, String)> {
        match self.0.get(key) {
            Some(serde_json::Value::Object(map)) => map
                .iter()
                .filter_map(|(k, v)| {
                    let text = match v {
                        serde_json::Value::String(s) => s.clone(),
                        serde_json::Value::Number(n) => n.to_string(),
                        _ => return None,
                    };
                    Some((k.clone(), text))
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Uniform step signature: `(payload, params) -> payload`.
pub type StepFn = dyn Fn(Frame, &StepParams) -> Result<Frame, EtlError> + Send + Sync;

/// Open registry mapping step names to implementations.
pub struct StepRegistry {
    steps: HashMap<String, Arc<StepFn>>,
}

impl StepRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            steps: HashMap::new(),
        }
    }

    /// Registry pre-populated with every built-in step.
    #[must_use]
    pub fn with_default_steps() -> Self {
        let mut registry = Self::new();
        steps::register_default_steps(&mut registry);
        registry
    }

    /// Register (or override) a step implementation.
    pub fn register<F>(&mut self, name: &str, step: F)
    where
        F: Fn(Frame, &StepParams) -> Result<Frame, EtlError> + Send + Sync + 'static,
    {
        self.steps.insert(name.to_string(), Arc::new(step));
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.steps.contains_key(name)
    }

    fn get(&self, name: &str) -> Result<Arc<StepFn>, EtlError> {
        self.steps.get(name).cloned().ok_or_else(|| {
            EtlError::config("UNKNOWN_STEP", format!("unknown processing step '{name}'"))
        })
    }

    /// Build a pipeline from the table's declared step chain. Unknown step
    /// names fail here, before any data is touched.
    ///
    /// # Errors
    ///
    /// Returns a config error for the first undeclared step name.
    pub fn build_pipeline(
        &self,
        config: &[ProcessingStepConfig],
    ) -> Result<ProcessingPipeline, EtlError> {
        let mut pipeline = ProcessingPipeline::new();
        for step in config {
            pipeline.steps.push(BoundStep {
                name: step.name.clone(),
                func: self.get(&step.name)?,
                params: StepParams(step.params.clone()),
            });
        }
        Ok(pipeline)
    }
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::with_default_steps()
    }
}

struct BoundStep {
    name: String,
    func: Arc<StepFn>,
    params: StepParams,
}

impl std::fmt::Debug for BoundStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundStep")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// An ordered, ready-to-run chain of steps.
#[derive(Default, Debug)]
pub struct ProcessingPipeline {
    steps: Vec<BoundStep>,
}

impl ProcessingPipeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    #[must_use]
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    /// Apply every step in order.
    ///
    /// # Errors
    ///
    /// Returns a data error naming the failed step and its cause.
    pub fn process(&self, frame: Frame) -> Result<Frame, EtlError> {
        if frame.is_empty() {
            debug!("empty payload, skipping processing");
            return Ok(frame);
        }
        let mut current = frame;
        for (i, step) in self.steps.iter().enumerate() {
            debug!(step = %step.name, position = i + 1, total = self.steps.len(), "applying step");
            current = (step.func)(current, &step.params).map_err(|cause| {
                EtlError::data(
                    "STEP_FAILED",
                    format!("processing step '{}' failed: {cause}", step.name),
                )
            })?;
        }
        Ok(current)
    }
}
