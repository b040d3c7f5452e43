use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::error::Error;

/// One entry of the template call chain.
///
/// Frames are owned by the evaluator and stay opaque here: the error type only
/// hands them back to the [`StackRenderer`] that came with the snapshot.
pub trait Frame: Any + Send + Sync + fmt::Debug {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + Send + Sync + fmt::Debug> Frame for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl dyn Frame + '_ {
    /// Downcast to the evaluator's concrete frame type.
    pub fn downcast_ref<T: Frame>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// Turns frames into text. Supplied by the evaluator together with each capture.
pub trait StackRenderer: Send + Sync {
    /// Single-line rendering of one frame, used for the failing instruction.
    fn render_frame(&self, frame: &dyn Frame) -> Result<String, Error>;

    /// Full rendering of a call chain, innermost frame first.
    fn render_stack(&self, frames: &[Arc<dyn Frame>]) -> Result<String, Error>;
}

/// The execution context that was active when a template error was raised.
pub trait ExecutionContext: Send + Sync {
    /// Snapshot of the active call chain, innermost frame first.
    ///
    /// Called on the failure path, so it must not block or fail.
    fn capture_stack(&self) -> StackSnapshot;

    /// Whether description builders may append hints for template authors.
    fn show_error_tips(&self) -> bool {
        true
    }
}

/// Immutable capture of the template call chain.
#[derive(Clone)]
pub struct StackSnapshot {
    frames: Arc<[Arc<dyn Frame>]>,
    renderer: Arc<dyn StackRenderer>,
}

impl StackSnapshot {
    pub fn new(frames: impl Into<Arc<[Arc<dyn Frame>]>>, renderer: Arc<dyn StackRenderer>) -> Self {
        Self {
            frames: frames.into(),
            renderer,
        }
    }

    pub fn frames(&self) -> &[Arc<dyn Frame>] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// The innermost frame, i.e. the instruction that failed.
    pub fn failing_frame(&self) -> Option<&dyn Frame> {
        self.frames.first().map(|frame| &**frame)
    }

    pub(crate) fn render_stack(&self) -> Result<String, Error> {
        self.renderer.render_stack(&self.frames)
    }

    /// `""` for an empty capture, otherwise the optional "more frames" note
    /// followed by the failing frame.
    pub(crate) fn render_top(&self) -> Result<String, Error> {
        let Some(failing) = self.failing_frame() else {
            return Ok(String::new());
        };
        let mut top = String::new();
        if self.len() > 1 {
            top.push_str(&format!(" (print stack trace for {} more)", self.len() - 1));
        }
        top.push_str(":\n==> ");
        top.push_str(&self.renderer.render_frame(failing)?);
        Ok(top)
    }
}

impl fmt::Debug for StackSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackSnapshot")
            .field("frames", &self.frames)
            .finish_non_exhaustive()
    }
}
