use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;
use std::iter;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::exception::TemplateError;

type BoxedError = Box<dyn StdError + Send + Sync + 'static>;

type RootProbe = for<'a> fn(
    &'a (dyn StdError + Send + Sync + 'static),
) -> Result<Option<&'a (dyn StdError + 'static)>, Error>;

/// Optional capability of wrapper errors that keep their real origin outside of
/// the `source()` chain.
pub trait RootCause {
    fn root_cause(&self) -> Result<Option<&(dyn StdError + 'static)>, Error>;
}

/// The error that made template evaluation fail, together with its type name.
pub struct Cause {
    type_name: Cow<'static, str>,
    error: BoxedError,
    root_probe: Option<RootProbe>,
}

impl Cause {
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            type_name: Cow::Borrowed(std::any::type_name::<E>()),
            error: Box::new(error),
            root_probe: None,
        }
    }

    /// Wraps an error whose [`RootCause`] is consulted when the report is printed.
    pub fn with_root_cause<E>(error: E) -> Self
    where
        E: StdError + RootCause + Send + Sync + 'static,
    {
        Self {
            root_probe: Some(probe_root_cause::<E>),
            ..Self::new(error)
        }
    }

    pub(crate) fn persisted(cause: PersistedCause) -> Self {
        Self {
            type_name: Cow::Owned(cause.type_name.clone().unwrap_or_default()),
            error: Box::new(cause),
            root_probe: None,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn error(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.error.as_ref()
    }

    /// Root cause worth printing next to what the host printer already shows,
    /// if any. With `chains_causes` the whole `source()` chain counts as shown,
    /// otherwise only the cause itself.
    ///
    /// Failures of the probe, panics included, yield `None`.
    pub(crate) fn extra_root_cause(
        &self,
        chains_causes: bool,
    ) -> Option<&(dyn StdError + 'static)> {
        let probe = self.root_probe?;
        let error = self.error();
        let root = panic::catch_unwind(AssertUnwindSafe(|| probe(error)))
            .ok()?
            .ok()??;
        let root_text = root.to_string();
        let shown = if chains_causes { usize::MAX } else { 1 };
        let first: &(dyn StdError + 'static) = error;
        let already_shown = iter::successors(Some(first), |&e| e.source())
            .take(shown)
            .any(|e| ptr::addr_eq(e, root) && e.to_string() == root_text);
        (!already_shown).then_some(root)
    }
}

fn probe_root_cause<'a, E>(
    error: &'a (dyn StdError + Send + Sync + 'static),
) -> Result<Option<&'a (dyn StdError + 'static)>, Error>
where
    E: StdError + RootCause + Send + Sync + 'static,
{
    error
        .downcast_ref::<E>()
        .ok_or_else(|| Error::Render {
            reason: format!("cause is not a {}", std::any::type_name::<E>()),
        })?
        .root_cause()
}

impl<E> From<E> for Cause
where
    E: StdError + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Self::new(error)
    }
}

impl fmt::Debug for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cause")
            .field("type_name", &self.type_name)
            .field("error", &self.error)
            .field("has_root_cause", &self.root_probe.is_some())
            .finish()
    }
}

/// Serializable stand-in for a cause chain. Replaces the live cause after a
/// [`TemplateError`] was deserialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedCause {
    /// Known for the direct cause and for chained template errors only.
    pub type_name: Option<String>,
    pub message: String,
    pub source: Option<Box<PersistedCause>>,
}

impl PersistedCause {
    pub(crate) fn capture(cause: &Cause) -> Self {
        let mut persisted = Self::capture_error(cause.error());
        if persisted.type_name.is_none() {
            persisted.type_name = Some(cause.type_name().to_string());
        }
        persisted
    }

    fn capture_error(error: &(dyn StdError + 'static)) -> Self {
        if let Some(persisted) = error.downcast_ref::<PersistedCause>() {
            return persisted.clone();
        }
        let type_name = error
            .downcast_ref::<TemplateError>()
            .map(|_| std::any::type_name::<TemplateError>().to_string());
        Self {
            type_name,
            message: error.to_string(),
            source: error
                .source()
                .map(|source| Box::new(Self::capture_error(source))),
        }
    }
}

impl fmt::Display for PersistedCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for PersistedCause {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|source| source as &(dyn StdError + 'static))
    }
}
