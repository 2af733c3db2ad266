//! The loaded set of plans.
//!
//! A catalog is built once at startup and then shared behind an `Arc`.
//! Reloading produces a fresh catalog; callers swap it in explicitly.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use super::loader::{self, LoadReport, ParseError};
use super::matcher;
use super::PlanDefinition;

/// Plans keyed by name
#[derive(Debug, Clone, Default)]
pub struct PlanCatalog {
    plans: BTreeMap<String, Arc<PlanDefinition>>,
    dirs: Vec<PathBuf>,
}

impl PlanCatalog {
    /// Create a new empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every plan under the given directories.
    ///
    /// When two files declare the same plan name, the first one in sorted
    /// path order wins and the other is logged and skipped.
    pub fn load<P: AsRef<Path>>(dirs: &[P]) -> Self {
        let report = loader::scan(dirs);
        let mut catalog = Self::from_report(report);
        catalog.dirs = dirs.iter().map(|d| d.as_ref().to_path_buf()).collect();
        catalog
    }

    fn from_report(report: LoadReport) -> Self {
        let mut catalog = Self::new();
        for plan in report.plans {
            if let Err(e) = catalog.insert(plan) {
                warn!("{}, keeping the first definition", e);
            }
        }
        catalog
    }

    /// Build a catalog from plans constructed in code
    pub fn from_plans(plans: impl IntoIterator<Item = PlanDefinition>) -> Result<Self, ParseError> {
        let mut catalog = Self::new();
        for plan in plans {
            catalog.insert(plan)?;
        }
        Ok(catalog)
    }

    /// Register a plan. Names are unique; re-registration is an error.
    pub fn insert(&mut self, plan: PlanDefinition) -> Result<(), ParseError> {
        if self.plans.contains_key(&plan.name) {
            return Err(ParseError::DuplicatePlan { name: plan.name });
        }
        self.plans.insert(plan.name.clone(), Arc::new(plan));
        Ok(())
    }

    /// Re-scan the directories this catalog was loaded from
    pub fn reload(&self) -> Self {
        let fresh = Self::load(self.dirs.as_slice());
        info!(
            "Reloaded plan catalog: {} plan(s) (was {})",
            fresh.len(),
            self.len()
        );
        fresh
    }

    pub fn get(&self, name: &str) -> Option<Arc<PlanDefinition>> {
        self.plans.get(name).cloned()
    }

    /// Plan names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.plans.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlanDefinition> {
        self.plans.values().map(Arc::as_ref)
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    /// Directories this catalog was loaded from
    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Best plan for an utterance, if any meets the evidence threshold
    pub fn find_best(&self, utterance: &str) -> Option<Arc<PlanDefinition>> {
        let name = matcher::find_best(self.iter(), utterance)?.name.clone();
        self.get(&name)
    }
}
