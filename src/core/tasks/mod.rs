//! OS tag to task producer lookup.

pub mod linux;

pub use linux::LinuxTasks;

use crate::error::{Error, Result};
use crate::task::TaskProducer;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Clone)]
pub struct ProducerRegistry {
    producers: BTreeMap<String, Arc<dyn TaskProducer>>,
}

impl Default for ProducerRegistry {
    /// Registry with every built-in producer (`linux`).
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(LinuxTasks));
        registry
    }
}

impl ProducerRegistry {
    pub fn empty() -> Self {
        Self {
            producers: BTreeMap::new(),
        }
    }

    /// Register under the producer's own OS tag, replacing any previous one.
    pub fn register(&mut self, producer: Arc<dyn TaskProducer>) {
        self.producers.insert(producer.os().to_string(), producer);
    }

    pub fn get(&self, os: &str) -> Result<Arc<dyn TaskProducer>> {
        self.producers
            .get(os)
            .cloned()
            .ok_or_else(|| Error::config_unsupported_os(os, self.supported()))
    }

    pub fn supported(&self) -> Vec<String> {
        self.producers.keys().cloned().collect()
    }
}
