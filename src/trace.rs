//! Call-stack capture for server-error events.
//!
//! Frames are rendered as `file:line`, innermost first. Frames from the Rust
//! standard library and from registry crates (tokio, hyper, futures: the
//! runtime and the transport) are dropped, leaving application frames.
//!
//! A panic unwinds past the frame that caused it long before the dispatcher
//! regains control, so the stack is captured from a panic hook instead. The
//! hook only captures while a dispatch chain is being polled on the current
//! thread with tracing enabled; everywhere else it just forwards to the
//! previously installed hook.

use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::future::{Future, poll_fn};
use std::path::Path;
use std::pin::pin;
use std::sync::Once;

thread_local! {
    /// `Some(short_caller)` while an armed chain is being polled.
    static ARMED: Cell<Option<bool>> = const { Cell::new(None) };
    static PANIC_TRACE: RefCell<Option<Vec<String>>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

/// Walks the current stack, starting at the first frame outside this module.
pub(crate) fn capture(short: bool) -> Vec<String> {
    render(&Backtrace::force_capture().to_string(), short)
}

/// Formats a single source location.
pub(crate) fn location(file: &str, line: u32, short: bool) -> String {
    let file = if short { base_name(file) } else { file };
    format!("{file}:{line}")
}

pub(crate) fn install_panic_hook() {
    HOOK.call_once(|| {
        let prev = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if let Some(short) = ARMED.with(Cell::get) {
                let mut trace = capture(short);
                if trace.is_empty() {
                    if let Some(loc) = info.location() {
                        trace.push(location(loc.file(), loc.line(), short));
                    }
                }
                PANIC_TRACE.with(|t| *t.borrow_mut() = Some(trace));
            }
            prev(info);
        }));
    });
}

/// Takes the trace recorded by the most recent armed panic on this thread.
pub(crate) fn take_panic_trace() -> Option<Vec<String>> {
    PANIC_TRACE.with(|t| t.borrow_mut().take())
}

/// Polls `fut` with panic-trace capture armed for the duration of each poll.
pub(crate) async fn armed<F: Future>(fut: F, short: bool) -> F::Output {
    let mut fut = pin!(fut);
    poll_fn(move |cx| {
        let _guard = ArmGuard::set(short);
        fut.as_mut().poll(cx)
    })
    .await
}

struct ArmGuard(Option<bool>);

impl ArmGuard {
    fn set(short: bool) -> Self {
        Self(ARMED.with(|a| a.replace(Some(short))))
    }
}

impl Drop for ArmGuard {
    fn drop(&mut self) {
        ARMED.with(|a| a.set(self.0));
    }
}

/// Frames without a parsable `at file:line` line are skipped, so an
/// unexpected rendering yields a shorter trace rather than a wrong one.
fn render(backtrace: &str, short: bool) -> Vec<String> {
    backtrace
        .lines()
        .filter_map(|line| line.trim_start().strip_prefix("at "))
        .filter(|loc| !is_runtime_frame(loc))
        .filter_map(split_location)
        .skip_while(|(file, _)| is_capture_frame(file))
        .map(|(file, line)| location(file, line, short))
        .collect()
}

/// Frames of the capture machinery itself, however many survive inlining.
fn is_capture_frame(file: &str) -> bool {
    Path::new(file).ends_with(file!())
}

/// Splits `file:line:col` (or `file:line`) into its file and line.
fn split_location(loc: &str) -> Option<(&str, u32)> {
    let mut parts = loc.rsplitn(3, ':');
    let last = parts.next()?;
    let middle = parts.next()?;
    match parts.next() {
        Some(file) => Some((file, middle.parse().ok()?)),
        None => Some((middle, last.parse().ok()?)),
    }
}

fn is_runtime_frame(loc: &str) -> bool {
    loc.starts_with("/rustc/")
        || loc.contains("/.cargo/registry/")
        || loc.contains("/.cargo/git/")
        || loc.contains("\\.cargo\\registry\\")
}

fn base_name(file: &str) -> &str {
    file.rsplit(['/', '\\']).next().unwrap_or(file)
}
