//! Job handler pipeline.
//!
//! `before_process → process (chunked) → after_process → on_success | on_error`
//!
//! Handlers are closures, so they never leave the process. Serialized job
//! snapshots only record which of them are present ([`HandlerPresence`]).

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use super::job::{JobError, JobHandle, JobResult};
use crate::error::JobflowError;

pub type BeforeProcessFn<I> =
    Arc<dyn Fn(JobHandle) -> BoxFuture<'static, JobResult<Vec<I>>> + Send + Sync>;
pub type ProcessFn<I, P> =
    Arc<dyn Fn(Vec<I>, JobHandle) -> BoxFuture<'static, JobResult<Vec<P>>> + Send + Sync>;
pub type AfterProcessFn<P, O> =
    Arc<dyn Fn(Vec<P>, JobHandle) -> BoxFuture<'static, JobResult<Vec<O>>> + Send + Sync>;
pub type OnSuccessFn<O> = Arc<dyn Fn(&[O]) + Send + Sync>;
pub type OnErrorFn = Arc<dyn Fn(&JobflowError) + Send + Sync>;

/// Handler set for a job. `process` is mandatory, everything else optional.
///
/// Type parameters: `I` input items, `P` processed items, `O` final output.
pub struct JobHandlers<I, P = I, O = P> {
    pub(crate) before_process: Option<BeforeProcessFn<I>>,
    pub(crate) process: ProcessFn<I, P>,
    pub(crate) after_process: Option<AfterProcessFn<P, O>>,
    pub(crate) identity: Option<fn(Vec<P>) -> Vec<O>>,
    pub(crate) on_success: Option<OnSuccessFn<O>>,
    pub(crate) on_error: Option<OnErrorFn>,
}

impl<I, P, O> Clone for JobHandlers<I, P, O> {
    fn clone(&self) -> Self {
        Self {
            before_process: self.before_process.clone(),
            process: self.process.clone(),
            after_process: self.after_process.clone(),
            identity: self.identity,
            on_success: self.on_success.clone(),
            on_error: self.on_error.clone(),
        }
    }
}

impl<I, P, O> JobHandlers<I, P, O> {
    pub fn presence(&self) -> HandlerPresence {
        HandlerPresence {
            has_before_process: self.before_process.is_some(),
            has_process_function: true,
            has_after_process: self.after_process.is_some(),
            has_on_success: self.on_success.is_some(),
            has_on_error: self.on_error.is_some(),
        }
    }
}

impl<I, P, O> fmt::Debug for JobHandlers<I, P, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandlers")
            .field("presence", &self.presence())
            .finish()
    }
}

impl<I, P> JobHandlers<I, P, P>
where
    I: Send + 'static,
    P: Send + 'static,
{
    /// Handlers with only a `process` function. Processed items are the output.
    pub fn new<F, Fut>(process: F) -> Self
    where
        F: Fn(Vec<I>, JobHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobResult<Vec<P>>> + Send + 'static,
    {
        Self {
            before_process: None,
            process: Arc::new(move |items, handle| process(items, handle).boxed()),
            after_process: None,
            identity: Some(|items| items),
            on_success: None,
            on_error: None,
        }
    }

    /// Add an `after_process` stage mapping all processed items to the output.
    ///
    /// The output type changes, so an `on_success` hook registered earlier is
    /// discarded; register it after this call.
    pub fn with_after_process<O, F, Fut>(self, after: F) -> JobHandlers<I, P, O>
    where
        O: Send + 'static,
        F: Fn(Vec<P>, JobHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobResult<Vec<O>>> + Send + 'static,
    {
        JobHandlers {
            before_process: self.before_process,
            process: self.process,
            after_process: Some(Arc::new(move |items, handle| after(items, handle).boxed())),
            identity: None,
            on_success: None,
            on_error: self.on_error,
        }
    }
}

impl<I, P, O> JobHandlers<I, P, O>
where
    I: Send + 'static,
    P: Send + 'static,
    O: Send + 'static,
{
    /// Fetch the input. Without it, input must be supplied by the caller.
    pub fn with_before_process<F, Fut>(mut self, before: F) -> Self
    where
        F: Fn(JobHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobResult<Vec<I>>> + Send + 'static,
    {
        self.before_process = Some(Arc::new(move |handle| before(handle).boxed()));
        self
    }

    pub fn on_success<F>(mut self, hook: F) -> Self
    where
        F: Fn(&[O]) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(hook));
        self
    }

    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&JobflowError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }

    /// Run `after_process`, or pass processed items through unchanged.
    pub(crate) async fn finish(&self, processed: Vec<P>, handle: JobHandle) -> JobResult<Vec<O>> {
        match (&self.after_process, self.identity) {
            (Some(after), _) => after(processed, handle).await,
            (None, Some(identity)) => Ok(identity(processed)),
            // Only reachable through a hand-built value; constructors always set one.
            (None, None) => Err(JobError::fatal(
                "job has neither after_process nor a passthrough output",
            )),
        }
    }

    pub(crate) fn notify_success(&self, output: &[O]) {
        if let Some(hook) = &self.on_success {
            run_hook("on_success", || hook(output));
        }
    }

    pub(crate) fn notify_error(&self, error: &JobflowError) {
        if let Some(hook) = &self.on_error {
            run_hook("on_error", || hook(error));
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Panic Isolation
// ═══════════════════════════════════════════════════════════════════════════════

/// Await a handler future, turning a panic into a fatal [`JobError`].
pub(crate) async fn guard_panics<T, F>(stage: &'static str, future: F) -> JobResult<T>
where
    F: Future<Output = JobResult<T>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(JobError::fatal(format!(
            "{} panicked: {}",
            stage,
            panic_message(payload.as_ref())
        ))),
    }
}

/// Call a notification hook. A panicking hook is logged and otherwise ignored.
pub(crate) fn run_hook(hook: &'static str, call: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(call)) {
        tracing::error!(hook, panic = %panic_message(payload.as_ref()), "Hook panicked");
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Which handlers a job defines. This is what snapshots persist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerPresence {
    pub has_before_process: bool,
    pub has_process_function: bool,
    pub has_after_process: bool,
    pub has_on_success: bool,
    pub has_on_error: bool,
}
