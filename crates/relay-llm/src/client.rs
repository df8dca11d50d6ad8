use std::collections::HashMap;
use std::sync::Arc;

use relay_types::RelayError;

use crate::{Backend, FallbackCandidate};

// ---------------------------------------------------------------------------
// BackendRegistration
// ---------------------------------------------------------------------------

/// A named backend plus what it declares about itself.
#[derive(Clone)]
pub struct BackendRegistration {
    name: String,
    backend: Arc<dyn Backend>,
    models: Vec<String>,
    provider_options_schema: Option<serde_json::Value>,
}

impl BackendRegistration {
    pub fn new(name: impl Into<String>, backend: impl Backend + 'static) -> Self {
        Self::from_arc(name, Arc::new(backend))
    }

    pub fn from_arc(name: impl Into<String>, backend: Arc<dyn Backend>) -> Self {
        Self {
            name: name.into(),
            backend,
            models: Vec::new(),
            provider_options_schema: None,
        }
    }

    pub fn with_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.models = models.into_iter().map(Into::into).collect();
        self
    }

    /// JSON schema describing the `provider_options` this backend accepts.
    pub fn with_provider_options_schema(mut self, schema: serde_json::Value) -> Self {
        self.provider_options_schema = Some(schema);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub fn provider_options_schema(&self) -> Option<&serde_json::Value> {
        self.provider_options_schema.as_ref()
    }

    /// Whether `model` was declared. A registration with no declared models
    /// accepts any identifier.
    pub fn declares_model(&self, model: &str) -> bool {
        self.models.is_empty() || self.models.iter().any(|m| m == model)
    }
}

impl std::fmt::Debug for BackendRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistration")
            .field("name", &self.name)
            .field("models", &self.models)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// BackendRegistry
// ---------------------------------------------------------------------------

/// Read-only map of backends, populated once at construction.
#[derive(Clone, Default, Debug)]
pub struct BackendRegistry {
    backends: HashMap<String, BackendRegistration>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry, rejecting duplicate names.
    pub fn from_registrations(
        registrations: impl IntoIterator<Item = BackendRegistration>,
    ) -> Result<Self, RelayError> {
        let mut backends = HashMap::new();
        for registration in registrations {
            let name = registration.name.clone();
            if backends.insert(name.clone(), registration).is_some() {
                return Err(RelayError::Config(format!(
                    "Backend '{name}' registered more than once"
                )));
            }
        }
        Ok(Self { backends })
    }

    /// A new registry with `registration` added or replaced; `self` is untouched.
    pub fn extended(&self, registration: BackendRegistration) -> Self {
        let mut backends = self.backends.clone();
        backends.insert(registration.name.clone(), registration);
        Self { backends }
    }

    pub fn get(&self, name: &str) -> Result<&BackendRegistration, RelayError> {
        self.backends
            .get(name)
            .ok_or_else(|| RelayError::BackendNotFound {
                backend: name.to_string(),
            })
    }

    /// Check every candidate's backend before any attempt is made.
    pub fn check_candidates(&self, candidates: &[FallbackCandidate]) -> Result<(), RelayError> {
        for candidate in candidates {
            let registration = self.get(&candidate.backend)?;
            if !registration.declares_model(&candidate.model) {
                tracing::warn!(
                    backend = %candidate.backend,
                    model = %candidate.model,
                    "Model not declared by backend"
                );
            }
        }
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
