use std::sync::Arc;

use crate::error::Error;
use crate::stack::{STACK_SECTION_SEPARATOR, SourceFrame, StackFormat, TraceStyle};
use crate::types::{Frame, StackRenderer};

/// Renders [`SourceFrame`]s; any other frame type falls back to its `Debug` form.
#[derive(Debug, Clone, Default)]
pub struct DefaultStackRenderer {
    format: StackFormat,
}

impl DefaultStackRenderer {
    pub fn new(format: StackFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> &StackFormat {
        &self.format
    }

    fn frames_to_show(&self, total: usize) -> usize {
        match self.format.style {
            TraceStyle::Full => total,
            TraceStyle::Terse if total <= self.format.terse_limit => total,
            TraceStyle::Terse => self.format.terse_limit.saturating_sub(1),
        }
    }
}

impl StackRenderer for DefaultStackRenderer {
    fn render_frame(&self, frame: &dyn Frame) -> Result<String, Error> {
        Ok(match frame.downcast_ref::<SourceFrame>() {
            Some(source) => source.to_string(),
            None => format!("{frame:?}"),
        })
    }

    fn render_stack(&self, frames: &[Arc<dyn Frame>]) -> Result<String, Error> {
        let mut out = String::new();
        out.push_str(STACK_SECTION_SEPARATOR);
        out.push('\n');

        if frames.is_empty() {
            out.push_str("(The stack was empty)\n");
        } else {
            let shown = self.frames_to_show(frames.len());
            for (idx, frame) in frames.iter().take(shown).enumerate() {
                out.push_str(if idx == 0 {
                    "\t- Failed at: "
                } else {
                    "\t- Reached through: "
                });
                out.push_str(&self.render_frame(&**frame)?);
                out.push('\n');
            }
            let hidden = frames.len() - shown;
            if hidden > 0 {
                out.push_str(&format!(
                    "\t... (Had {hidden} more, hidden for terseness)\n"
                ));
            }
        }

        out.push_str(STACK_SECTION_SEPARATOR);
        out.push('\n');
        Ok(out)
    }
}
