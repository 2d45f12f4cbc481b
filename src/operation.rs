//! # Target Operations and Hooks
//!
//! The harness is agnostic to what it measures. A target is "a callable with a
//! known arity", resolved once when the workload is built, so nothing is looked
//! up per invocation. Three arities are supported:
//!
//! - **zero-argument**: `Target::new` (no worker arguments) or
//!   `Target::ignoring_arg` (inside a workload whose workers carry arguments)
//! - **one-argument**: `Target::with_arg`, receives the worker's argument
//! - **contextual**: `Target::with_context`, receives an `InvocationContext`
//!   with the worker/loop indices, the argument and the cancellation token
//!
//! Every target returns `anyhow::Result<T>`. Errors and panics are captured by
//! the invocation runner as sample data.
//!
//! Hooks are optional zero-argument callables run around each loop iteration
//! and each invocation. A failing or panicking hook is logged and ignored.

use crate::cancel::CancelToken;
use crate::error::ConfigError;
use anyhow::{anyhow, Result};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

/// An optional setup/teardown callback.
pub type Hook = Arc<dyn Fn() -> Result<()> + Send + Sync>;

/// Per-call information handed to contextual targets.
pub struct InvocationContext<'a, A> {
    pub worker_index: usize,
    pub loop_index: usize,
    pub arg: Option<&'a A>,
    pub cancel: &'a CancelToken,
}

type NullaryFn<T> = dyn Fn() -> Result<T> + Send + Sync;
type UnaryFn<A, T> = dyn Fn(&A) -> Result<T> + Send + Sync;
type ContextFn<A, T> = dyn Fn(&InvocationContext<'_, A>) -> Result<T> + Send + Sync;

enum Callable<A, T> {
    Nullary(Arc<NullaryFn<T>>),
    Unary(Arc<UnaryFn<A, T>>),
    Contextual(Arc<ContextFn<A, T>>),
}

impl<A, T> Clone for Callable<A, T> {
    fn clone(&self) -> Self {
        match self {
            Callable::Nullary(f) => Callable::Nullary(Arc::clone(f)),
            Callable::Unary(f) => Callable::Unary(Arc::clone(f)),
            Callable::Contextual(f) => Callable::Contextual(Arc::clone(f)),
        }
    }
}

/// A named operation to be measured.
pub struct Target<A, T> {
    name: Arc<str>,
    callable: Callable<A, T>,
}

impl<A, T> Clone for Target<A, T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            callable: self.callable.clone(),
        }
    }
}

impl<A, T> std::fmt::Debug for Target<A, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let arity = match self.callable {
            Callable::Nullary(_) => "nullary",
            Callable::Unary(_) => "unary",
            Callable::Contextual(_) => "contextual",
        };
        f.debug_struct("Target")
            .field("name", &self.name)
            .field("arity", &arity)
            .finish()
    }
}

impl<T> Target<(), T> {
    /// A zero-argument target for workloads without worker arguments.
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        Self::ignoring_arg(name, f)
    }
}

impl<A, T> Target<A, T> {
    /// A zero-argument target inside a workload whose workers carry an
    /// argument of type `A`. The argument is not passed to `f`.
    pub fn ignoring_arg<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name.into()),
            callable: Callable::Nullary(Arc::new(f)),
        }
    }

    /// A one-argument target. Each worker passes its own argument.
    pub fn with_arg<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&A) -> Result<T> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name.into()),
            callable: Callable::Unary(Arc::new(f)),
        }
    }

    /// A target that receives the full invocation context, including the
    /// cancellation token.
    pub fn with_context<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&InvocationContext<'_, A>) -> Result<T> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name.into()),
            callable: Callable::Contextual(Arc::new(f)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn shared_name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    /// Whether this target cannot run without a worker argument.
    pub fn requires_arg(&self) -> bool {
        matches!(self.callable, Callable::Unary(_))
    }

    /// Call the target once. Errors are returned, panics propagate.
    pub(crate) fn call(&self, ctx: &InvocationContext<'_, A>) -> Result<T> {
        match &self.callable {
            Callable::Nullary(f) => f(),
            Callable::Unary(f) => match ctx.arg {
                Some(arg) => f(arg),
                None => Err(anyhow!("operation '{}' requires an argument", self.name)),
            },
            Callable::Contextual(f) => f(ctx),
        }
    }
}

/// Optional callbacks around loop iterations and invocations.
#[derive(Clone, Default)]
pub struct Hooks {
    pub setup_loop: Option<Hook>,
    pub teardown_loop: Option<Hook>,
    pub setup_invocation: Option<Hook>,
    pub teardown_invocation: Option<Hook>,
}

impl Hooks {
    pub fn setup_loop<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        self.setup_loop = Some(Arc::new(f));
        self
    }

    pub fn teardown_loop<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        self.teardown_loop = Some(Arc::new(f));
        self
    }

    pub fn setup_invocation<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        self.setup_invocation = Some(Arc::new(f));
        self
    }

    pub fn teardown_invocation<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        self.teardown_invocation = Some(Arc::new(f));
        self
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("setup_loop", &self.setup_loop.is_some())
            .field("teardown_loop", &self.teardown_loop.is_some())
            .field("setup_invocation", &self.setup_invocation.is_some())
            .field("teardown_invocation", &self.teardown_invocation.is_some())
            .finish()
    }
}

/// Run an optional hook, logging and discarding any error or panic.
///
/// Returns `true` when the hook was absent or succeeded.
pub(crate) fn run_hook(label: &str, hook: Option<&Hook>, worker_index: usize) -> bool {
    let Some(hook) = hook else {
        return true;
    };

    match panic::catch_unwind(AssertUnwindSafe(|| hook())) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!("Worker {}: {} hook failed: {:#}", worker_index, label, e);
            false
        }
        Err(payload) => {
            warn!(
                "Worker {}: {} hook panicked: {}",
                worker_index,
                label,
                panic_message(payload.as_ref())
            );
            false
        }
    }
}

/// Best-effort extraction of a panic payload's message.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// The ordered set of targets invoked in every loop iteration, plus hooks.
#[derive(Clone, Debug)]
pub struct Workload<A, T> {
    targets: Vec<Target<A, T>>,
    hooks: Hooks,
}

impl<A, T> Workload<A, T> {
    pub fn new(target: Target<A, T>) -> Self {
        Self {
            targets: vec![target],
            hooks: Hooks::default(),
        }
    }

    /// Append another target, invoked after the existing ones in each loop.
    pub fn then(mut self, target: Target<A, T>) -> Self {
        self.targets.push(target);
        self
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn targets(&self) -> &[Target<A, T>] {
        &self.targets
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    /// Check that every target can be called with the configured arguments.
    pub fn validate(&self, has_args: bool) -> Result<(), ConfigError> {
        if self.targets.is_empty() {
            return Err(ConfigError::EmptyWorkload);
        }
        if !has_args {
            if let Some(target) = self.targets.iter().find(|t| t.requires_arg()) {
                return Err(ConfigError::MissingArgument {
                    operation: target.name().to_string(),
                });
            }
        }
        Ok(())
    }
}
