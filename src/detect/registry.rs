use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use super::backend::DetectorBackend;
use super::backends::MotionBackend;
use crate::config::DetectorSettings;

/// Shared handle to a backend. The registry keeps one handle and each session
/// worker locks it for the duration of a `detect` call.
pub type SharedBackend = Arc<Mutex<dyn DetectorBackend>>;

/// Thread-safe registry of detector backends.
///
/// Backends are wrapped in `Mutex` because `DetectorBackend::detect` takes `&mut self`.
pub struct BackendRegistry {
    backends: HashMap<String, SharedBackend>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            default_name: None,
        }
    }

    /// Backends the daemon can run: motion always, tract when it is the
    /// configured backend. Scripted backends are for tests and replays only.
    pub fn from_settings(settings: &DetectorSettings) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(MotionBackend::new());
        if settings.backend == "tract" {
            #[cfg(feature = "backend-tract")]
            {
                let model_path = settings
                    .model_path
                    .as_ref()
                    .ok_or_else(|| anyhow!("the tract backend requires detector.model_path"))?;
                registry.register(super::backends::TractBackend::new(
                    model_path,
                    settings.model_input,
                )?);
            }
            #[cfg(not(feature = "backend-tract"))]
            {
                return Err(anyhow!(
                    "the tract backend requires the backend-tract feature"
                ));
            }
        }
        log::debug!("detector backends: {}", registry.list().join(", "));
        Ok(registry)
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register<B: DetectorBackend + 'static>(&mut self, backend: B) {
        let name = backend.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.backends.insert(name, Arc::new(Mutex::new(backend)));
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.backends.contains_key(name) {
            return Err(anyhow!("backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    /// Get backend by name.
    pub fn get(&self, name: &str) -> Option<SharedBackend> {
        self.backends.get(name).cloned()
    }

    /// Get default backend.
    pub fn default_backend(&self) -> Option<SharedBackend> {
        self.default_name.as_ref().and_then(|name| self.get(name))
    }

    /// Look up a backend by name, falling back to the default when `name` is
    /// `None`.
    pub fn select(&self, name: Option<&str>) -> Result<SharedBackend> {
        match name {
            Some(name) => self.get(name).ok_or_else(|| {
                anyhow!(
                    "backend '{}' not registered (available: {})",
                    name,
                    self.list().join(", ")
                )
            }),
            None => self
                .default_backend()
                .ok_or_else(|| anyhow!("no detector backends registered")),
        }
    }

    /// List registered backends, sorted by name.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::{MotionBackend, StubBackend};

    #[test]
    fn first_registered_is_default() {
        let mut registry = BackendRegistry::new();
        registry.register(MotionBackend::new());
        registry.register(StubBackend::new(Vec::new()));

        let backend = registry.select(None).unwrap();
        assert_eq!(backend.lock().unwrap().name(), "motion");

        registry.set_default("stub").unwrap();
        let backend = registry.select(None).unwrap();
        assert_eq!(backend.lock().unwrap().name(), "stub");
    }

    #[test]
    fn unknown_backend_lists_alternatives() {
        let mut registry = BackendRegistry::new();
        registry.register(MotionBackend::new());

        let err = registry.select(Some("tract")).err().unwrap();
        assert!(err.to_string().contains("motion"));
        assert!(registry.set_default("tract").is_err());
    }

    fn settings(backend: &str) -> DetectorSettings {
        DetectorSettings {
            backend: backend.to_string(),
            model_path: None,
            model_input: 640,
            confidence_threshold: 0.5,
        }
    }

    #[test]
    fn configured_registry_offers_motion_but_not_scripted_backends() {
        let registry = BackendRegistry::from_settings(&settings("motion")).unwrap();
        assert_eq!(registry.list(), vec!["motion".to_string()]);
        assert!(registry.select(Some("motion")).is_ok());

        let err = registry.select(Some("stub")).err().unwrap();
        assert!(err.to_string().contains("not registered"));
    }

    #[test]
    fn configured_tract_needs_a_model() {
        assert!(BackendRegistry::from_settings(&settings("tract")).is_err());
    }

    #[test]
    fn empty_registry_has_no_default() {
        let registry = BackendRegistry::default();
        assert!(registry.select(None).is_err());
        assert!(registry.list().is_empty());
    }
}
