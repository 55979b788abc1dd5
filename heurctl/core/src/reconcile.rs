//! Config Reconciler
//!
//! Merges server-pushed configuration with the locally persisted cache.
//!
//! For each of the three cached sections (algorithm parameter sets, shared
//! parameters, function catalog): a cache entry, when present, wins
//! verbatim; otherwise the server value is adopted and written to the cache.
//! This runs once per connection generation. The user's function choice is
//! cached too but never comes from the server. Live job status (progress,
//! started/paused flags) is never cached; the session takes it from the
//! server directly.
//!
//! # Snapshots
//!
//! The current configuration is an `Arc<ConfigSnapshot>`. Every change
//! builds a new snapshot and swaps the pointer, so a consumer holding the
//! previous `Arc` keeps seeing a consistent, unchanged value.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::messages::ServerSnapshot;
use crate::params::{AlgorithmParams, FnData, JobConfig, ParamError, ParamSpec};
use crate::store::{ConfigStore, StoreError};

/// Cache key for algorithm parameter sets
pub const ALGORITHMS_KEY: &str = "algorithms";
/// Cache key for the shared parameter set
pub const SHARED_PARAMS_KEY: &str = "shared_params";
/// Cache key for the function catalog
pub const FUNCTIONS_KEY: &str = "functions";
/// Cache key for the function chosen for the next job
pub const SELECTED_FUNCTION_KEY: &str = "selected_function";

/// Immutable view of the job configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    /// Per-algorithm parameter sets
    pub algorithms: Vec<AlgorithmParams>,
    /// Parameters shared by every enabled algorithm
    pub shared_params: Vec<ParamSpec>,
    /// Function catalog
    pub functions: Vec<FnData>,
    /// Function chosen for the next job; defaults to the first catalog entry
    pub selected_function: Option<FnData>,
}

impl ConfigSnapshot {
    /// The function the next job will use
    pub fn function(&self) -> Option<&FnData> {
        self.selected_function.as_ref().or_else(|| self.functions.first())
    }

    /// Assemble a submittable job configuration
    ///
    /// # Errors
    ///
    /// Returns [`ParamError::NoFunction`] when no function is selected and
    /// the catalog is empty.
    pub fn job_config(&self) -> Result<JobConfig, ParamError> {
        let function = self.function().cloned().ok_or(ParamError::NoFunction)?;
        Ok(JobConfig {
            function,
            algorithms: self.algorithms.clone(),
            shared: self.shared_params.clone(),
        })
    }
}

/// Where a reconciled section came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    /// Local cache entry adopted
    Cache,
    /// Server value adopted and cached
    Server,
}

/// Outcome of one reconciliation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reconciliation {
    /// Source of the algorithm parameter sets
    pub algorithms: Origin,
    /// Source of the shared parameters
    pub shared_params: Origin,
    /// Source of the function catalog
    pub functions: Origin,
}

/// Owns the cached configuration and every write to it
pub struct ConfigReconciler<S> {
    store: S,
    current: Arc<ConfigSnapshot>,
    reconciled_generation: Option<u64>,
}

impl<S: ConfigStore> ConfigReconciler<S> {
    /// Create a reconciler, seeding the snapshot from the cache
    pub fn new(store: S) -> Self {
        let mut reconciler = Self {
            store,
            current: Arc::new(ConfigSnapshot::default()),
            reconciled_generation: None,
        };
        let seeded = ConfigSnapshot {
            algorithms: reconciler.load_entry(ALGORITHMS_KEY).unwrap_or_default(),
            shared_params: reconciler.load_entry(SHARED_PARAMS_KEY).unwrap_or_default(),
            functions: reconciler.load_entry(FUNCTIONS_KEY).unwrap_or_default(),
            selected_function: reconciler.load_entry(SELECTED_FUNCTION_KEY),
        };
        reconciler.current = Arc::new(seeded);
        reconciler
    }

    /// Current snapshot
    pub fn current(&self) -> Arc<ConfigSnapshot> {
        Arc::clone(&self.current)
    }

    /// The backing store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Job configuration built from the current snapshot
    ///
    /// # Errors
    ///
    /// See [`ConfigSnapshot::job_config`].
    pub fn job_config(&self) -> Result<JobConfig, ParamError> {
        self.current.job_config()
    }

    /// Read and decode one cache entry; unreadable entries count as absent
    fn load_entry<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.store.load(key) {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(decoded) => Some(decoded),
                Err(e) => {
                    warn!(key, error = %e, "Ignoring cache entry with unexpected shape");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key, error = %e, "Ignoring unreadable cache entry");
                None
            }
        }
    }

    fn persist<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let encoded = serde_json::to_value(value).map_err(|source| StoreError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.store.save(key, &encoded)
    }

    fn reconcile_section<T>(&self, key: &str, server: &T) -> (T, Origin)
    where
        T: Serialize + DeserializeOwned + Clone,
    {
        if let Some(cached) = self.load_entry(key) {
            return (cached, Origin::Cache);
        }
        if let Err(e) = self.persist(key, server) {
            warn!(key, error = %e, "Failed to cache server configuration");
        }
        (server.clone(), Origin::Server)
    }

    /// Reconcile against a `get_params` snapshot
    ///
    /// Runs at most once per connection `generation`; later calls for the
    /// same generation return `None` and change nothing.
    pub fn reconcile(&mut self, server: &ServerSnapshot, generation: u64) -> Option<Reconciliation> {
        if self.reconciled_generation == Some(generation) {
            debug!(generation, "Configuration already reconciled for this connection");
            return None;
        }
        self.reconciled_generation = Some(generation);

        let (algorithms, algorithms_origin) =
            self.reconcile_section(ALGORITHMS_KEY, &server.algorithms);
        let (shared_params, shared_origin) =
            self.reconcile_section(SHARED_PARAMS_KEY, &server.shared_params);
        let (functions, functions_origin) =
            self.reconcile_section(FUNCTIONS_KEY, &server.functions_data);

        let outcome = Reconciliation {
            algorithms: algorithms_origin,
            shared_params: shared_origin,
            functions: functions_origin,
        };
        info!(generation, ?outcome, "Configuration reconciled");

        self.current = Arc::new(ConfigSnapshot {
            algorithms,
            shared_params,
            functions,
            selected_function: self.current.selected_function.clone(),
        });
        Some(outcome)
    }

    fn replace(&mut self, next: ConfigSnapshot) {
        self.current = Arc::new(next);
    }

    /// Replace the algorithm parameter sets and write them through
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the cache write fails; the in-memory
    /// snapshot is updated regardless.
    pub fn set_algorithms(&mut self, algorithms: Vec<AlgorithmParams>) -> Result<(), StoreError> {
        let next = ConfigSnapshot {
            algorithms,
            ..(*self.current).clone()
        };
        self.replace(next);
        self.persist(ALGORITHMS_KEY, &self.current.algorithms)
    }

    /// Replace the shared parameters and write them through
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the cache write fails.
    pub fn set_shared_params(&mut self, shared_params: Vec<ParamSpec>) -> Result<(), StoreError> {
        let next = ConfigSnapshot {
            shared_params,
            ..(*self.current).clone()
        };
        self.replace(next);
        self.persist(SHARED_PARAMS_KEY, &self.current.shared_params)
    }

    /// Enable or disable one algorithm by name
    ///
    /// Returns `Ok(false)` if no algorithm has that name.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the cache write fails.
    pub fn set_algorithm_enabled(&mut self, name: &str, enabled: bool) -> Result<bool, StoreError> {
        if !self.current.algorithms.iter().any(|a| a.name == name) {
            return Ok(false);
        }
        let algorithms = self
            .current
            .algorithms
            .iter()
            .map(|a| {
                if a.name == name {
                    a.with_enabled(enabled)
                } else {
                    a.clone()
                }
            })
            .collect();
        self.set_algorithms(algorithms)?;
        Ok(true)
    }

    /// Select a catalog function by name and write the choice through
    ///
    /// Returns `Ok(false)` if the catalog has no such function.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the cache write fails; the selection
    /// still applies to this session.
    pub fn select_function(&mut self, name: &str) -> Result<bool, StoreError> {
        let Some(function) = self.current.functions.iter().find(|f| f.name == name).cloned() else {
            return Ok(false);
        };
        self.select(function)?;
        Ok(true)
    }

    /// Select a user-supplied function and write the choice through
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the cache write fails.
    pub fn select_custom(&mut self, function: FnData) -> Result<(), StoreError> {
        self.select(function)
    }

    fn select(&mut self, function: FnData) -> Result<(), StoreError> {
        debug!(function = %function.name, custom = function.is_custom, "Function selected");
        let next = ConfigSnapshot {
            selected_function: Some(function),
            ..(*self.current).clone()
        };
        self.replace(next);
        self.persist(SELECTED_FUNCTION_KEY, &self.current.selected_function)
    }
}
