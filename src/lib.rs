#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::dbg_macro,
        clippy::print_stdout,
        clippy::print_stderr,
        clippy::panic,
    )
)]

pub mod error;
pub mod exception;
pub mod stack;
pub mod types;

pub use error::Error;
pub use exception::print::{
    DOMAIN_STACK_HEADING, HOST_STACK_HEADING, MESSAGE_ALREADY_PRINTED, REPORT_HEADING,
    ROOT_CAUSE_HEADING, UNDERLYING_CAUSE_HEADING,
};
pub use exception::{
    Cause, ChainedTracePrinter, DescriptionBuilder, FlatTracePrinter, FmtWriter, HostPrinterKind,
    HostTracePrinter, IoWriter, PersistedCause, PrintOptions, RootCause, TemplateError,
    TraceSubject, TraceWriter, host_printer_for,
};
pub use stack::{
    DefaultStackRenderer, STACK_SECTION_SEPARATOR, SourceFrame, SourceLocation, StackFormat,
    TraceStyle,
};
pub use types::{ExecutionContext, Frame, StackRenderer, StackSnapshot};
