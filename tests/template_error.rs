#![expect(
    clippy::unwrap_used,
    reason = "test code uses unwrap for concise assertions"
)]

use std::error::Error as StdError;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;

use parking_lot::Mutex;
use template_runtime_error::{
    Cause, DOMAIN_STACK_HEADING, DefaultStackRenderer, Error, ExecutionContext, FmtWriter, Frame,
    HOST_STACK_HEADING, HostPrinterKind, HostTracePrinter, MESSAGE_ALREADY_PRINTED,
    PrintOptions, REPORT_HEADING, ROOT_CAUSE_HEADING, RootCause, SourceFrame, StackRenderer,
    StackSnapshot, TemplateError, TraceSubject, TraceWriter, UNDERLYING_CAUSE_HEADING,
};

const TEMPLATE_ERROR: &str = "template_runtime_error::exception::TemplateError";

#[derive(Debug)]
struct LineFrame(u32);

struct LineRenderer;

impl StackRenderer for LineRenderer {
    fn render_frame(&self, frame: &dyn Frame) -> Result<String, Error> {
        let line = frame.downcast_ref::<LineFrame>().ok_or_else(|| Error::Render {
            reason: "not a line frame".into(),
        })?;
        Ok(format!("at line {}", line.0))
    }

    fn render_stack(&self, frames: &[Arc<dyn Frame>]) -> Result<String, Error> {
        let mut out = String::new();
        for frame in frames {
            out.push_str(&self.render_frame(&**frame)?);
            out.push('\n');
        }
        Ok(out)
    }
}

struct LineContext {
    lines: Vec<u32>,
}

impl ExecutionContext for LineContext {
    fn capture_stack(&self) -> StackSnapshot {
        let frames: Vec<Arc<dyn Frame>> = self
            .lines
            .iter()
            .map(|l| Arc::new(LineFrame(*l)) as Arc<dyn Frame>)
            .collect();
        StackSnapshot::new(frames, Arc::new(LineRenderer))
    }
}

fn line_context(lines: &[u32]) -> Arc<dyn ExecutionContext> {
    Arc::new(LineContext {
        lines: lines.to_vec(),
    })
}

#[derive(Debug, thiserror::Error)]
#[error("boom")]
struct Boom;

fn report(err: &TemplateError, options: PrintOptions) -> String {
    let mut out = String::new();
    err.print_fmt_with(&mut out, options).unwrap();
    out
}

fn lcg_next(state: &mut u64) -> u64 {
    *state = state
        .wrapping_mul(6_364_136_223_846_793_005)
        .wrapping_add(1);
    *state
}

// ──────────────────── Messages ────────────────────

#[test]
fn worked_example_division_by_zero() {
    let ctx = line_context(&[10, 3]);
    let err = TemplateError::new("Division by zero", Some(&ctx));

    assert_eq!(err.message_without_top().unwrap(), "Division by zero");
    assert_eq!(
        err.message().unwrap(),
        "Division by zero\n\nThe failing instruction (print stack trace for 1 more):\n==> at line 10"
    );
    assert_eq!(
        err.domain_stack_text().unwrap().as_deref(),
        Some("at line 10\nat line 3\n")
    );
}

#[test]
fn cause_only_message_names_the_cause_type() {
    let err = TemplateError::from_cause(Boom, None);
    assert_eq!(
        err.message().unwrap(),
        format!(
            "No error description was specified for this error; low-level message: {}: boom",
            std::any::type_name::<Boom>()
        )
    );
    assert_eq!(err.description().unwrap(), None);
}

#[test]
fn message_without_top_is_a_prefix_of_message() {
    let mut seed = 0x5EED_u64;
    for _ in 0..500 {
        let depth = (lcg_next(&mut seed) % 5) as u32;
        let lines: Vec<u32> = (0..depth).map(|i| i + 1).collect();
        let with_context = !lcg_next(&mut seed).is_multiple_of(4);
        let ctx = line_context(&lines);
        let ctx_ref = with_context.then_some(&ctx);

        let err = match lcg_next(&mut seed) % 4 {
            0 => TemplateError::new("", ctx_ref),
            1 => TemplateError::from_cause(Boom, ctx_ref),
            2 => TemplateError::without_description(ctx_ref),
            _ => TemplateError::with_cause("described", Boom, ctx_ref),
        };

        let message = err.message().unwrap();
        let without_top = err.message_without_top().unwrap();
        if with_context && depth > 0 {
            assert!(message.starts_with(&without_top));
            assert!(message.len() > without_top.len());
        } else {
            assert_eq!(message, without_top);
        }
    }
}

#[test]
fn concurrent_readers_see_one_rendering() {
    let ctx = line_context(&[7, 5, 1]);
    let err = TemplateError::with_cause("Missing value", Boom, Some(&ctx));
    let seen = Mutex::new(Vec::new());

    thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                let message = err.message().unwrap();
                let printed = report(&err, PrintOptions::default());
                seen.lock().push((message, printed));
            });
        }
    });

    let seen = seen.into_inner();
    assert_eq!(seen.len(), 8);
    assert!(seen.iter().all(|s| *s == seen[0]));
    assert_eq!(seen[0].0, err.message().unwrap());
    assert_eq!(seen[0].1, report(&err, PrintOptions::default()));
}

// ──────────────────── Printing ────────────────────

#[test]
fn full_report_merges_both_stacks() {
    let ctx = line_context(&[10, 3]);
    let err = TemplateError::with_cause("Division by zero", Boom, Some(&ctx));
    let out = report(&err, PrintOptions::default());

    let expected_start = format!(
        "{REPORT_HEADING}\nDivision by zero\n\n{DOMAIN_STACK_HEADING}\nat line 10\nat line 3\n\n\
         {HOST_STACK_HEADING}\n----\n{TEMPLATE_ERROR}: {MESSAGE_ALREADY_PRINTED}\n"
    );
    assert!(out.starts_with(&expected_start), "{out}");
    assert!(out.ends_with("Caused by: boom\n"), "{out}");
    assert!(!out.contains(UNDERLYING_CAUSE_HEADING));

    assert_eq!(
        err.message().unwrap(),
        "Division by zero\n\nThe failing instruction (print stack trace for 1 more):\n==> at line 10"
    );
}

#[test]
fn domain_only_report_skips_host_trace() {
    let ctx = line_context(&[4]);
    let err = TemplateError::new("Bad include", Some(&ctx));
    let out = report(
        &err,
        PrintOptions {
            heading: false,
            host_stack: false,
            ..PrintOptions::default()
        },
    );
    assert_eq!(
        out,
        format!("Bad include\n\n{DOMAIN_STACK_HEADING}\nat line 4\n")
    );
}

#[test]
fn missing_template_stack_forces_host_trace() {
    let options = PrintOptions {
        heading: false,
        domain_stack: true,
        host_stack: false,
        ..PrintOptions::default()
    };

    let empty = line_context(&[]);
    for err in [
        TemplateError::new("boom", Some(&empty)),
        TemplateError::new("boom", None),
    ] {
        let out = report(&err, options);
        assert!(!out.contains(DOMAIN_STACK_HEADING));
        assert!(!out.contains(HOST_STACK_HEADING));
        let header = format!("{TEMPLATE_ERROR}: boom\n");
        assert!(out.starts_with(&header), "{out}");
    }
}

#[test]
fn byte_sink_gets_the_same_report() {
    let ctx = line_context(&[10, 3]);
    let err = TemplateError::new("Division by zero", Some(&ctx));

    let mut bytes = Vec::new();
    err.print_io(&mut bytes).unwrap();

    let mut text = String::new();
    err.print_fmt(&mut text).unwrap();
    assert_eq!(String::from_utf8(bytes).unwrap(), text);
}

#[test]
fn flat_host_printer_gets_an_underlying_cause_block() {
    let err = TemplateError::with_cause("Division by zero", Boom, None);
    let out = report(
        &err,
        PrintOptions {
            heading: false,
            host_printer: HostPrinterKind::Flat,
            ..PrintOptions::default()
        },
    );
    assert!(!out.contains("Caused by:"));
    let underlying = format!(
        "{UNDERLYING_CAUSE_HEADING}\n{}: boom\n",
        std::any::type_name::<Boom>()
    );
    assert!(out.contains(&underlying), "{out}");
}

#[test]
fn nested_template_error_in_chain_is_not_suppressed() {
    let inner_ctx = line_context(&[2]);
    let inner = TemplateError::new("Inner failure", Some(&inner_ctx));
    let inner_message = inner.message().unwrap();

    let ctx = line_context(&[9]);
    let outer = TemplateError::with_cause("Outer failure", inner, Some(&ctx));
    let out = report(&outer, PrintOptions::default());

    assert_eq!(out.matches(MESSAGE_ALREADY_PRINTED).count(), 1);
    let chained = format!("Caused by: {inner_message}");
    assert!(out.contains(&chained), "{out}");
}

// ──────────────────── Recursion suppression ────────────────────

struct RecordingPrinter {
    seen: Mutex<Vec<String>>,
    fail: bool,
}

impl HostTracePrinter for RecordingPrinter {
    fn print_trace(
        &self,
        out: &mut dyn TraceWriter,
        subject: TraceSubject<'_>,
    ) -> Result<(), Error> {
        let text = subject.error.to_string();
        self.seen.lock().push(text.clone());
        if self.fail {
            return Err(Error::Render {
                reason: "sink rejected trace".into(),
            });
        }
        out.write_line(&text)
    }
}

#[test]
fn message_is_suppressed_only_while_host_trace_prints() {
    let ctx = line_context(&[10, 3]);
    let err = TemplateError::new("Division by zero", Some(&ctx));
    let full = err.message().unwrap();

    for fail in [false, true] {
        let printer = RecordingPrinter {
            seen: Mutex::new(Vec::new()),
            fail,
        };
        let mut out = String::new();
        let result = err.print_with(&mut FmtWriter(&mut out), PrintOptions::default(), &printer);
        assert_eq!(result.is_err(), fail);
        assert_eq!(
            *printer.seen.lock(),
            vec![MESSAGE_ALREADY_PRINTED.to_string()]
        );
        assert_eq!(err.message().unwrap(), full);
    }
}

#[test]
fn suppression_is_per_thread() {
    struct BlockingPrinter {
        entered: AtomicBool,
        release: AtomicBool,
    }

    impl HostTracePrinter for BlockingPrinter {
        fn print_trace(
            &self,
            out: &mut dyn TraceWriter,
            subject: TraceSubject<'_>,
        ) -> Result<(), Error> {
            self.entered.store(true, Ordering::SeqCst);
            while !self.release.load(Ordering::SeqCst) {
                thread::yield_now();
            }
            out.write_line(&subject.error.to_string())
        }
    }

    let ctx = line_context(&[1]);
    let err = TemplateError::new("Division by zero", Some(&ctx));
    let full = err.message().unwrap();
    let printer = BlockingPrinter {
        entered: AtomicBool::new(false),
        release: AtomicBool::new(false),
    };

    thread::scope(|scope| {
        let printing = scope.spawn(|| {
            let mut out = String::new();
            err.print_with(&mut FmtWriter(&mut out), PrintOptions::default(), &printer)
                .unwrap();
            out
        });
        while !printer.entered.load(Ordering::SeqCst) {
            thread::yield_now();
        }
        assert_eq!(err.message().unwrap(), full);
        printer.release.store(true, Ordering::SeqCst);
        let out = printing.join().unwrap();
        assert!(out.contains(MESSAGE_ALREADY_PRINTED));
    });
}

// ──────────────────── Root cause ────────────────────

#[derive(Debug, thiserror::Error)]
#[error("request failed")]
struct RequestFailed {
    root: Boom,
}

impl RootCause for RequestFailed {
    fn root_cause(&self) -> Result<Option<&(dyn StdError + 'static)>, Error> {
        Ok(Some(&self.root))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unprobeable")]
struct Unprobeable;

impl RootCause for Unprobeable {
    fn root_cause(&self) -> Result<Option<&(dyn StdError + 'static)>, Error> {
        Err(Error::Render {
            reason: "no root".into(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
#[error("include failed")]
struct IncludeFailed {
    #[source]
    inner: Boom,
}

impl RootCause for IncludeFailed {
    fn root_cause(&self) -> Result<Option<&(dyn StdError + 'static)>, Error> {
        Ok(Some(&self.inner))
    }
}

#[test]
fn root_cause_capability_enriches_the_report() {
    let err = TemplateError::with_cause(
        "Include failed",
        Cause::with_root_cause(RequestFailed { root: Boom }),
        None,
    );
    let out = report(&err, PrintOptions::default());
    assert!(out.contains("Caused by: request failed\n"), "{out}");
    let root = format!("{ROOT_CAUSE_HEADING}\nboom\n");
    assert!(out.ends_with(&root), "{out}");
}

#[test]
fn failing_root_cause_probe_does_not_abort_printing() {
    let err = TemplateError::with_cause(
        "Include failed",
        Cause::with_root_cause(Unprobeable),
        None,
    );
    let out = report(&err, PrintOptions::default());
    assert!(out.ends_with("Caused by: unprobeable\n"), "{out}");
    assert!(!out.contains(ROOT_CAUSE_HEADING));
}

#[test]
fn chained_root_cause_is_not_repeated() {
    let err = TemplateError::with_cause(
        "Include failed",
        Cause::with_root_cause(IncludeFailed { inner: Boom }),
        None,
    );
    let out = report(&err, PrintOptions::default());
    let chain = "Caused by: include failed\nCaused by: boom\n";
    assert!(out.ends_with(chain), "{out}");
    assert!(!out.contains(ROOT_CAUSE_HEADING));
}

#[test]
fn flat_printer_reports_a_root_cause_from_the_source_chain() {
    let err = TemplateError::with_cause(
        "Include failed",
        Cause::with_root_cause(IncludeFailed { inner: Boom }),
        None,
    );
    let out = report(
        &err,
        PrintOptions {
            heading: false,
            host_printer: HostPrinterKind::Flat,
            ..PrintOptions::default()
        },
    );
    let expected_end = format!(
        "{UNDERLYING_CAUSE_HEADING}\n{}: include failed\n{ROOT_CAUSE_HEADING}\nboom\n",
        std::any::type_name::<IncludeFailed>()
    );
    assert!(out.ends_with(&expected_end), "{out}");
    assert!(!out.contains("Caused by:"));
}

// ──────────────────── Serialization ────────────────────

#[test]
fn serde_round_trip_keeps_rendered_text() {
    let ctx = line_context(&[10, 3]);
    let err = TemplateError::with_cause("Division by zero", Boom, Some(&ctx));
    let json = serde_json::to_string(&err).unwrap();
    drop(ctx);

    let restored: TemplateError = serde_json::from_str(&json).unwrap();
    assert_eq!(restored.message().unwrap(), err.message().unwrap());
    assert_eq!(
        restored.message_without_top().unwrap(),
        err.message_without_top().unwrap()
    );
    assert_eq!(
        restored.domain_stack_text().unwrap(),
        err.domain_stack_text().unwrap()
    );
    assert_eq!(
        restored.description().unwrap().as_deref(),
        Some("Division by zero")
    );
    assert!(restored.context().is_none());

    let cause = restored.cause().unwrap();
    assert_eq!(cause.type_name(), std::any::type_name::<Boom>());
    assert_eq!(cause.error().to_string(), "boom");
    assert_eq!(
        report(&restored, PrintOptions::default()),
        report(&err, PrintOptions::default())
    );
}

#[test]
fn serde_round_trip_without_template_stack() {
    let err = TemplateError::from_cause(Boom, None);
    let json = serde_json::to_string(&err).unwrap();
    let restored: TemplateError = serde_json::from_str(&json).unwrap();

    assert_eq!(restored.message().unwrap(), err.message().unwrap());
    assert_eq!(restored.domain_stack_text().unwrap(), None);
    assert_eq!(restored.description().unwrap(), None);
}

// ──────────────────── Live call chains ────────────────────

/// Call chain that keeps changing while errors are captured and printed.
struct LiveContext {
    stack: Mutex<Vec<Arc<dyn Frame>>>,
}

impl ExecutionContext for LiveContext {
    fn capture_stack(&self) -> StackSnapshot {
        StackSnapshot::new(
            self.stack.lock().clone(),
            Arc::new(DefaultStackRenderer::default()),
        )
    }
}

#[test]
fn printing_races_with_continued_execution() {
    let live = Arc::new(LiveContext {
        stack: Mutex::new(Vec::new()),
    });
    let ctx: Arc<dyn ExecutionContext> = live.clone();
    let (tx, rx) = mpsc::channel::<(TemplateError, usize)>();
    let printed = AtomicUsize::new(0);

    thread::scope(|scope| {
        scope.spawn(|| {
            for (err, depth) in rx {
                let stack = err.domain_stack_text().unwrap().unwrap();
                assert_eq!(stack.matches("\t- ").count(), depth);
                let out = report(&err, PrintOptions::default());
                assert!(out.contains(&stack));
                printed.fetch_add(1, Ordering::SeqCst);
            }
        });

        let mut seed = 0x00C0_FFEE_u64;
        for i in 0..200_u32 {
            let frame = SourceFrame::new(format!("#macro m{i}"));
            let depth = {
                let mut stack = live.stack.lock();
                stack.push(Arc::new(frame.at("live.ftl", i + 1, 1)));
                stack.len()
            };
            let err = TemplateError::new(format!("failure {i}"), Some(&ctx));
            tx.send((err, depth)).unwrap();
            if lcg_next(&mut seed).is_multiple_of(3) {
                live.stack.lock().pop();
            }
        }
        drop(tx);
    });

    assert_eq!(printed.load(Ordering::SeqCst), 200);
}

#[test]
fn shared_sink_reports_do_not_interleave() {
    let ctx = line_context(&[10, 3]);
    let err = TemplateError::with_cause("Division by zero", Boom, Some(&ctx));
    let sink = Mutex::new(Vec::new());

    thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| err.print_shared(&sink, PrintOptions::default()).unwrap());
        }
    });

    let single = report(&err, PrintOptions::default());
    let out = String::from_utf8(sink.into_inner()).unwrap();
    assert_eq!(out, single.repeat(4));
}
