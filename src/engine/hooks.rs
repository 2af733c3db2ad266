//! Plan lifecycle hooks.
//!
//! A plan may name a `pre` hook (runs before the first step; failure aborts
//! the run) and a `post` hook (runs after the last step; failure is logged
//! only). Hook names resolve through a `HookRegistry`; a name with no
//! registered implementation is logged and treated as a no-op.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use super::events::HookPhase;
use super::SessionContext;

/// Error returned by a hook
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct HookError {
    pub reason: String,
}

impl HookError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// What a hook gets to see
#[derive(Debug, Clone)]
pub struct HookContext {
    pub plan_name: String,
    pub run_id: String,
    pub phase: HookPhase,
    pub utterance: String,
    pub session: SessionContext,
}

#[async_trait]
pub trait Hook: Send + Sync {
    async fn run(&self, ctx: &HookContext) -> Result<(), HookError>;
}

struct FnHook<F>(F);

#[async_trait]
impl<F> Hook for FnHook<F>
where
    F: Fn(&HookContext) -> Result<(), HookError> + Send + Sync,
{
    async fn run(&self, ctx: &HookContext) -> Result<(), HookError> {
        (self.0)(ctx)
    }
}

/// Wrap a closure as a hook
pub fn hook_fn<F>(func: F) -> Arc<dyn Hook>
where
    F: Fn(&HookContext) -> Result<(), HookError> + Send + Sync + 'static,
{
    Arc::new(FnHook(func))
}

/// Hook name → implementation
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: HashMap<String, Arc<dyn Hook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a hook
    pub fn with(mut self, name: impl Into<String>, hook: Arc<dyn Hook>) -> Self {
        self.hooks.insert(name.into(), hook);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.hooks.contains_key(name)
    }

    /// Run a hook by name; unregistered names succeed without doing anything
    pub async fn run(&self, name: &str, ctx: &HookContext) -> Result<(), HookError> {
        match self.hooks.get(name) {
            Some(hook) => hook.run(ctx).await,
            None => {
                info!(
                    "{} hook '{}' for plan '{}' has no implementation, skipping",
                    ctx.phase, name, ctx.plan_name
                );
                Ok(())
            }
        }
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.hooks.keys().collect();
        names.sort();
        f.debug_struct("HookRegistry").field("hooks", &names).finish()
    }
}
