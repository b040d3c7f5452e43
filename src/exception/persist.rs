use parking_lot::Mutex;
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::exception::print::Suppression;
use crate::exception::{
    Cause, HostBacktrace, PersistedCause, RenderCache, RenderState, TemplateError,
};

/// Persisted form of a [`TemplateError`]. Holds rendered text only: the
/// execution context and the captured frames never leave the process.
#[derive(Serialize, Deserialize)]
struct PersistedTemplateError {
    description: Option<String>,
    cause: Option<PersistedCause>,
    full_stack_text: Option<String>,
    stack_top_text: Option<String>,
    message: String,
    message_without_top: String,
    host_backtrace: Option<String>,
}

impl Serialize for TemplateError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let cache = self.render_all().map_err(S::Error::custom)?;
        let (Some(message), Some(message_without_top)) = (cache.message, cache.message_without_top)
        else {
            return Err(S::Error::custom("template error message was not rendered"));
        };
        PersistedTemplateError {
            description: cache.description,
            cause: self.cause.as_ref().map(PersistedCause::capture),
            full_stack_text: cache.full_stack,
            stack_top_text: cache.stack_top,
            message,
            message_without_top,
            host_backtrace: self.host_backtrace(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TemplateError {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let persisted = PersistedTemplateError::deserialize(deserializer)?;
        Ok(Self {
            cause: persisted.cause.map(Cause::persisted),
            context: None,
            host_backtrace: persisted.host_backtrace.map(HostBacktrace::Rendered),
            state: Mutex::new(RenderState {
                builder: None,
                snapshot: None,
                cache: RenderCache {
                    description: persisted.description,
                    full_stack: persisted.full_stack_text,
                    stack_top: persisted.stack_top_text,
                    message: Some(persisted.message),
                    message_without_top: Some(persisted.message_without_top),
                },
            }),
            suppression: Suppression::default(),
        })
    }
}
