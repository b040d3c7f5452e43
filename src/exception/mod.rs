//! The runtime error raised while a template is being evaluated.
//!
//! A [`TemplateError`] carries two call chains: the template's own (captured
//! from the [`ExecutionContext`] when the error is created) and the host's
//! (`source()` chain plus an optional [`Backtrace`]). Everything derived from
//! them is rendered lazily, at most once, under a per-instance lock.

pub mod cause;
mod persist;
pub mod print;

use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error as StdError;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::Error;
use crate::types::{ExecutionContext, Frame, StackSnapshot};

pub use cause::{Cause, PersistedCause, RootCause};
pub use print::{
    ChainedTracePrinter, FlatTracePrinter, FmtWriter, HostPrinterKind, HostTracePrinter,
    IoWriter, PrintOptions, TraceSubject, TraceWriter, host_printer_for,
};

use print::{MESSAGE_ALREADY_PRINTED, Suppression};

const THE_FAILING_INSTRUCTION: &str = "The failing instruction";
const NO_DESCRIPTION: &str = "[No error description was available.]";
const LOW_LEVEL_MESSAGE_PREFIX: &str =
    "No error description was specified for this error; low-level message: ";

/// Builds the description from the failing frame and the "show tips" setting.
pub type DescriptionBuilder =
    dyn Fn(Option<&dyn Frame>, bool) -> Result<String, Error> + Send + 'static;

#[derive(Debug)]
enum HostBacktrace {
    Captured(Backtrace),
    Rendered(String),
}

impl HostBacktrace {
    fn capture() -> Option<Self> {
        if !cfg!(feature = "backtrace") {
            return None;
        }
        let backtrace = Backtrace::capture();
        match backtrace.status() {
            BacktraceStatus::Captured => Some(Self::Captured(backtrace)),
            _ => None,
        }
    }

    fn render(&self) -> String {
        match self {
            Self::Captured(backtrace) => backtrace.to_string(),
            Self::Rendered(text) => text.clone(),
        }
    }
}

/// Text derived from the snapshot and the description. Every field goes from
/// `None` to `Some` once and then stays.
#[derive(Debug, Default, Clone)]
struct RenderCache {
    description: Option<String>,
    full_stack: Option<String>,
    stack_top: Option<String>,
    message: Option<String>,
    message_without_top: Option<String>,
}

/// Everything behind the instance lock.
struct RenderState {
    builder: Option<Box<DescriptionBuilder>>,
    snapshot: Option<StackSnapshot>,
    cache: RenderCache,
}

impl RenderState {
    fn description(&mut self, show_tips: impl FnOnce() -> bool) -> Result<Option<String>, Error> {
        if self.cache.description.is_none()
            && let Some(builder) = &self.builder
        {
            let failing = self.snapshot.as_ref().and_then(|s| s.failing_frame());
            let description = builder(failing, show_tips())?;
            self.cache.description = Some(description);
            self.builder = None;
            self.release_snapshot_if_rendered();
        }
        Ok(self.cache.description.clone())
    }

    fn full_stack(&mut self) -> Result<Option<String>, Error> {
        if self.cache.full_stack.is_none() {
            let Some(snapshot) = &self.snapshot else {
                return Ok(None);
            };
            let text = snapshot.render_stack()?;
            tracing::debug!(frames = snapshot.len(), "rendered template stack");
            self.cache.full_stack = Some(text);
            self.release_snapshot_if_rendered();
        }
        Ok(self.cache.full_stack.clone())
    }

    fn stack_top(&mut self) -> Result<Option<String>, Error> {
        if self.cache.stack_top.is_none() {
            let Some(snapshot) = &self.snapshot else {
                return Ok(None);
            };
            let text = snapshot.render_top()?;
            self.cache.stack_top = Some(text);
            self.release_snapshot_if_rendered();
        }
        Ok(self.cache.stack_top.clone())
    }

    /// The builder still needs the failing frame, so it keeps the snapshot alive too.
    fn release_snapshot_if_rendered(&mut self) {
        if self.snapshot.is_some()
            && self.builder.is_none()
            && self.cache.full_stack.is_some()
            && self.cache.stack_top.is_some()
        {
            self.snapshot = None;
            tracing::debug!("released template stack snapshot");
        }
    }

    fn messages(
        &mut self,
        cause: Option<&Cause>,
        show_tips: impl FnOnce() -> bool,
    ) -> Result<(String, String), Error> {
        if let (Some(message), Some(without_top)) =
            (&self.cache.message, &self.cache.message_without_top)
        {
            return Ok((message.clone(), without_top.clone()));
        }

        let base = match (self.description(show_tips)?, cause) {
            (Some(description), _) if !description.is_empty() => description,
            (_, Some(cause)) => format!(
                "{LOW_LEVEL_MESSAGE_PREFIX}{}: {}",
                cause.type_name(),
                cause.error()
            ),
            (_, None) => NO_DESCRIPTION.to_string(),
        };
        let message = match self.stack_top()? {
            Some(top) if !top.is_empty() => format!("{base}\n\n{THE_FAILING_INSTRUCTION}{top}"),
            _ => base.clone(),
        };
        tracing::trace!(len = message.len(), "composed template error message");

        self.cache.message = Some(message.clone());
        self.cache.message_without_top = Some(base.clone());
        Ok((message, base))
    }
}

/// Error raised while a template is executed.
pub struct TemplateError {
    cause: Option<Cause>,
    context: Option<Weak<dyn ExecutionContext>>,
    host_backtrace: Option<HostBacktrace>,
    state: Mutex<RenderState>,
    suppression: Suppression,
}

impl TemplateError {
    pub fn new(
        description: impl Into<String>,
        context: Option<&Arc<dyn ExecutionContext>>,
    ) -> Self {
        Self::assemble(Some(description.into()), None, None, context)
    }

    pub fn with_cause(
        description: impl Into<String>,
        cause: impl Into<Cause>,
        context: Option<&Arc<dyn ExecutionContext>>,
    ) -> Self {
        Self::assemble(Some(description.into()), None, Some(cause.into()), context)
    }

    /// The message is derived from the cause.
    pub fn from_cause(
        cause: impl Into<Cause>,
        context: Option<&Arc<dyn ExecutionContext>>,
    ) -> Self {
        Self::assemble(None, None, Some(cause.into()), context)
    }

    pub fn without_description(context: Option<&Arc<dyn ExecutionContext>>) -> Self {
        Self::assemble(None, None, None, context)
    }

    /// For evaluators: the description is built on first use, from the failing
    /// frame and the context's "show tips" setting.
    pub fn deferred<F>(
        builder: F,
        cause: Option<Cause>,
        context: Option<&Arc<dyn ExecutionContext>>,
    ) -> Self
    where
        F: Fn(Option<&dyn Frame>, bool) -> Result<String, Error> + Send + 'static,
    {
        Self::assemble(None, Some(Box::new(builder)), cause, context)
    }

    // Runs while another failure is being handled: no rendering here.
    fn assemble(
        description: Option<String>,
        builder: Option<Box<DescriptionBuilder>>,
        cause: Option<Cause>,
        context: Option<&Arc<dyn ExecutionContext>>,
    ) -> Self {
        let snapshot = context.map(|ctx| ctx.capture_stack());
        Self {
            cause,
            context: context.map(Arc::downgrade),
            host_backtrace: HostBacktrace::capture(),
            state: Mutex::new(RenderState {
                builder,
                snapshot,
                cache: RenderCache {
                    description,
                    ..RenderCache::default()
                },
            }),
            suppression: Suppression::default(),
        }
    }

    fn show_tips(&self) -> bool {
        self.context()
            .is_none_or(|context| context.show_error_tips())
    }

    fn rendered_messages(&self) -> Result<(String, String), Error> {
        self.state
            .lock()
            .messages(self.cause.as_ref(), || self.show_tips())
    }

    /// Description followed by the failing instruction, when one was captured.
    ///
    /// While this error's host trace is being printed on the current thread
    /// this returns a short placeholder instead.
    pub fn message(&self) -> Result<String, Error> {
        if self.suppression.is_active() {
            return Ok(MESSAGE_ALREADY_PRINTED.to_string());
        }
        Ok(self.rendered_messages()?.0)
    }

    /// [`Self::message`] without the failing instruction part.
    pub fn message_without_top(&self) -> Result<String, Error> {
        Ok(self.rendered_messages()?.1)
    }

    pub fn description(&self) -> Result<Option<String>, Error> {
        self.state.lock().description(|| self.show_tips())
    }

    /// Rendered template call chain, or `None` when the error was created
    /// outside of template execution.
    pub fn domain_stack_text(&self) -> Result<Option<String>, Error> {
        self.state.lock().full_stack()
    }

    pub(crate) fn stack_top_text(&self) -> Result<Option<String>, Error> {
        self.state.lock().stack_top()
    }

    pub fn cause(&self) -> Option<&Cause> {
        self.cause.as_ref()
    }

    /// `None` once the context is gone, and always after deserialization.
    pub fn context(&self) -> Option<Arc<dyn ExecutionContext>> {
        self.context.as_ref().and_then(Weak::upgrade)
    }

    pub fn host_backtrace(&self) -> Option<String> {
        self.host_backtrace.as_ref().map(HostBacktrace::render)
    }

    /// Renders everything that can still be rendered.
    fn render_all(&self) -> Result<RenderCache, Error> {
        let mut state = self.state.lock();
        state.description(|| self.show_tips())?;
        state.full_stack()?;
        state.stack_top()?;
        state.messages(self.cause.as_ref(), || self.show_tips())?;
        Ok(state.cache.clone())
    }

    #[cfg(test)]
    fn holds_snapshot(&self) -> bool {
        self.state.lock().snapshot.is_some()
    }
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Ok(message) => f.write_str(&message),
            Err(err) => {
                tracing::warn!(error = %err, "failed to render template error message");
                write!(f, "[Template error message could not be rendered: {err}]")
            }
        }
    }
}

impl fmt::Debug for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateError")
            .field("cause", &self.cause)
            .field("has_context", &self.context().is_some())
            .field("cache", &self.state.lock().cache)
            .field("has_host_backtrace", &self.host_backtrace.is_some())
            .field("suppression", &self.suppression)
            .finish_non_exhaustive()
    }
}

impl StdError for TemplateError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| cause.error() as &(dyn StdError + 'static))
    }
}
