use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::iter;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::exception::TemplateError;
use crate::stack::STACK_SECTION_SEPARATOR;

pub const REPORT_HEADING: &str = "Template error:";
pub const DOMAIN_STACK_HEADING: &str = "The failing instruction (template stack trace):";
pub const HOST_STACK_HEADING: &str = "Host stack trace (for programmers):";
pub const UNDERLYING_CAUSE_HEADING: &str = "Underlying cause:";
pub const ROOT_CAUSE_HEADING: &str = "Root cause:";
pub const MESSAGE_ALREADY_PRINTED: &str =
    "[... Error message was already printed; see it above ...]";

/// Output side of a report. Implemented for character and byte sinks.
pub trait TraceWriter {
    fn write_str(&mut self, s: &str) -> Result<(), Error>;

    fn write_line(&mut self, s: &str) -> Result<(), Error> {
        self.write_str(s)?;
        self.write_str("\n")
    }
}

pub struct FmtWriter<'a>(pub &'a mut dyn fmt::Write);

impl TraceWriter for FmtWriter<'_> {
    fn write_str(&mut self, s: &str) -> Result<(), Error> {
        Ok(self.0.write_str(s)?)
    }
}

pub struct IoWriter<'a>(pub &'a mut dyn io::Write);

impl TraceWriter for IoWriter<'_> {
    fn write_str(&mut self, s: &str) -> Result<(), Error> {
        Ok(self.0.write_all(s.as_bytes())?)
    }
}

/// What the host trace printer is asked to print.
pub struct TraceSubject<'a> {
    pub type_name: Option<&'a str>,
    pub error: &'a (dyn StdError + 'static),
    pub backtrace: Option<String>,
}

impl<'a> TraceSubject<'a> {
    /// Picks up type name and backtrace when `error` is a [`TemplateError`].
    pub fn of(error: &'a (dyn StdError + 'static)) -> Self {
        match error.downcast_ref::<TemplateError>() {
            Some(template_error) => template_error.subject(),
            None => Self {
                type_name: None,
                error,
                backtrace: None,
            },
        }
    }
}

/// The host's own way of printing an error and its `source()` chain.
pub trait HostTracePrinter: Send + Sync {
    fn print_trace(
        &self,
        out: &mut dyn TraceWriter,
        subject: TraceSubject<'_>,
    ) -> Result<(), Error>;

    /// Whether [`Self::print_trace`] already walks the `source()` chain.
    fn chains_causes(&self) -> bool {
        true
    }
}

fn print_header(out: &mut dyn TraceWriter, subject: &TraceSubject<'_>) -> Result<(), Error> {
    match subject.type_name {
        Some(type_name) => out.write_line(&format!("{type_name}: {}", subject.error))?,
        None => out.write_line(&subject.error.to_string())?,
    }
    if let Some(backtrace) = &subject.backtrace {
        out.write_str(backtrace)?;
        if !backtrace.ends_with('\n') {
            out.write_str("\n")?;
        }
    }
    Ok(())
}

/// Prints the error, its backtrace, then every `source()` as `Caused by:`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChainedTracePrinter;

impl HostTracePrinter for ChainedTracePrinter {
    fn print_trace(
        &self,
        out: &mut dyn TraceWriter,
        subject: TraceSubject<'_>,
    ) -> Result<(), Error> {
        print_header(out, &subject)?;
        for source in iter::successors(subject.error.source(), |&e| e.source()) {
            out.write_line(&format!("Caused by: {source}"))?;
        }
        Ok(())
    }
}

/// Prints the error and its backtrace only.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatTracePrinter;

impl HostTracePrinter for FlatTracePrinter {
    fn print_trace(
        &self,
        out: &mut dyn TraceWriter,
        subject: TraceSubject<'_>,
    ) -> Result<(), Error> {
        print_header(out, &subject)
    }

    fn chains_causes(&self) -> bool {
        false
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::AsRefStr,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum HostPrinterKind {
    #[default]
    Chained,
    Flat,
}

pub fn host_printer_for(kind: HostPrinterKind) -> &'static dyn HostTracePrinter {
    match kind {
        HostPrinterKind::Chained => &ChainedTracePrinter,
        HostPrinterKind::Flat => &FlatTracePrinter,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrintOptions {
    /// Print the [`REPORT_HEADING`] banner.
    pub heading: bool,
    pub domain_stack: bool,
    /// Forced on when there is no template stack to show.
    pub host_stack: bool,
    pub host_printer: HostPrinterKind,
}

impl Default for PrintOptions {
    fn default() -> Self {
        Self {
            heading: true,
            domain_stack: true,
            host_stack: true,
            host_printer: HostPrinterKind::default(),
        }
    }
}

/// Threads currently printing the host trace of one [`TemplateError`].
#[derive(Debug, Default)]
pub(crate) struct Suppression {
    threads: Mutex<Vec<ThreadId>>,
}

impl Suppression {
    pub(crate) fn is_active(&self) -> bool {
        self.threads.lock().contains(&thread::current().id())
    }

    pub(crate) fn enter(&self) -> SuppressionGuard<'_> {
        let thread = thread::current().id();
        self.threads.lock().push(thread);
        SuppressionGuard {
            owner: self,
            thread,
        }
    }
}

pub(crate) struct SuppressionGuard<'a> {
    owner: &'a Suppression,
    thread: ThreadId,
}

impl Drop for SuppressionGuard<'_> {
    fn drop(&mut self) {
        let mut threads = self.owner.threads.lock();
        if let Some(pos) = threads.iter().position(|t| *t == self.thread) {
            threads.swap_remove(pos);
        }
    }
}

impl TemplateError {
    /// Full report with [`PrintOptions::default`].
    pub fn print_fmt(&self, out: &mut dyn fmt::Write) -> Result<(), Error> {
        self.print_fmt_with(out, PrintOptions::default())
    }

    pub fn print_fmt_with(
        &self,
        out: &mut dyn fmt::Write,
        options: PrintOptions,
    ) -> Result<(), Error> {
        self.print_with(
            &mut FmtWriter(out),
            options,
            host_printer_for(options.host_printer),
        )
    }

    /// Full report with [`PrintOptions::default`].
    pub fn print_io(&self, out: &mut dyn io::Write) -> Result<(), Error> {
        self.print_io_with(out, PrintOptions::default())
    }

    pub fn print_io_with(
        &self,
        out: &mut dyn io::Write,
        options: PrintOptions,
    ) -> Result<(), Error> {
        self.print_with(
            &mut IoWriter(&mut *out),
            options,
            host_printer_for(options.host_printer),
        )?;
        Ok(out.flush()?)
    }

    /// Prints to a sink shared between threads, holding its lock for the whole report.
    pub fn print_shared<W: io::Write>(
        &self,
        sink: &Mutex<W>,
        options: PrintOptions,
    ) -> Result<(), Error> {
        let mut out = sink.lock();
        self.print_io_with(&mut *out, options)
    }

    /// Prints this error the way the host printer would, without the template stack.
    pub fn print_standard_trace(
        &self,
        out: &mut dyn TraceWriter,
        printer: &dyn HostTracePrinter,
    ) -> Result<(), Error> {
        printer.print_trace(out, self.subject())
    }

    /// Merged report of the template stack and the host trace.
    pub fn print_with(
        &self,
        out: &mut dyn TraceWriter,
        options: PrintOptions,
        printer: &dyn HostTracePrinter,
    ) -> Result<(), Error> {
        if options.heading {
            out.write_line(REPORT_HEADING)?;
        }

        let mut host_stack = options.host_stack;
        let mut domain_written = false;
        if options.domain_stack {
            match self.printable_domain_stack()? {
                Some(stack) => {
                    out.write_line(&self.message_without_top()?)?;
                    out.write_line("")?;
                    out.write_line(DOMAIN_STACK_HEADING)?;
                    out.write_str(&stack)?;
                    domain_written = true;
                }
                None => host_stack = true,
            }
        }

        if !host_stack {
            return Ok(());
        }

        if domain_written {
            out.write_line("")?;
            out.write_line(HOST_STACK_HEADING)?;
            out.write_line(STACK_SECTION_SEPARATOR)?;
            let _guard = self.suppression.enter();
            self.print_standard_trace(out, printer)?;
        } else {
            self.print_standard_trace(out, printer)?;
        }

        if let Some(cause) = &self.cause {
            if !printer.chains_causes() {
                out.write_line(UNDERLYING_CAUSE_HEADING)?;
                printer.print_trace(
                    out,
                    TraceSubject {
                        type_name: Some(cause.type_name()),
                        ..TraceSubject::of(cause.error())
                    },
                )?;
            }
            if let Some(root) = cause.extra_root_cause(printer.chains_causes()) {
                out.write_line(ROOT_CAUSE_HEADING)?;
                printer.print_trace(out, TraceSubject::of(root))?;
            }
        }
        Ok(())
    }

    /// Template stack text, unless nothing was captured or the capture was empty.
    fn printable_domain_stack(&self) -> Result<Option<String>, Error> {
        let Some(stack) = self.domain_stack_text()? else {
            return Ok(None);
        };
        let captured_frames = self.stack_top_text()?.is_some_and(|top| !top.is_empty());
        Ok(captured_frames.then_some(stack))
    }

    pub(crate) fn subject(&self) -> TraceSubject<'_> {
        TraceSubject {
            type_name: Some(std::any::type_name::<Self>()),
            error: self,
            backtrace: self.host_backtrace(),
        }
    }
}
