//! Output capture for running snippets.
//!
//! Scripts write through an [`OutputChannel`]. While a snippet runs the
//! channel is redirected into a [`CaptureBuffer`] by a [`Redirect`] guard,
//! which puts the previous sink back when it is dropped, including during
//! unwinding.

use std::cell::RefCell;
use std::io::Write;
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

/// Destination for text written by scripts.
pub trait TextSink {
    fn write_text(&mut self, text: &str);
}

/// Sink used when nothing is captured.
///
/// Writes to stderr: stdout carries protocol lines only.
#[derive(Debug, Default)]
pub struct StderrSink;

impl TextSink for StderrSink {
    fn write_text(&mut self, text: &str) {
        let _ = std::io::stderr().write_all(text.as_bytes());
    }
}

/// Append-only list of fragments written during one execution.
///
/// Clones share the same storage: the engine keeps one clone to read the
/// text back while the channel writes into the other.
#[derive(Debug, Clone, Default)]
pub struct CaptureBuffer {
    fragments: Rc<RefCell<Vec<String>>>,
}

impl CaptureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// All captured text, in write order.
    pub fn text(&self) -> String {
        self.fragments.borrow().concat()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.borrow().iter().all(String::is_empty)
    }
}

impl TextSink for CaptureBuffer {
    fn write_text(&mut self, text: &str) {
        self.fragments.borrow_mut().push(text.to_string());
    }
}

/// The process-level output channel scripts print to.
pub struct OutputChannel {
    sink: Box<dyn TextSink>,
    redirections: usize,
}

impl OutputChannel {
    pub fn new(sink: impl TextSink + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            redirections: 0,
        }
    }

    pub fn write(&mut self, text: &str) {
        self.sink.write_text(text);
    }

    /// Send output to `sink` until the returned guard is dropped.
    pub fn redirect(&mut self, sink: impl TextSink + 'static) -> Redirect<'_> {
        let previous = std::mem::replace(&mut self.sink, Box::new(sink));
        self.redirections += 1;
        Redirect {
            channel: self,
            previous: Some(previous),
        }
    }

    /// Whether a [`Redirect`] guard is currently active.
    pub fn is_redirected(&self) -> bool {
        self.redirections > 0
    }
}

impl Default for OutputChannel {
    fn default() -> Self {
        Self::new(StderrSink)
    }
}

/// Scoped redirection of an [`OutputChannel`].
///
/// Dereferences to the channel so writes go through the guard.
pub struct Redirect<'a> {
    channel: &'a mut OutputChannel,
    previous: Option<Box<dyn TextSink>>,
}

impl Deref for Redirect<'_> {
    type Target = OutputChannel;

    fn deref(&self) -> &OutputChannel {
        self.channel
    }
}

impl DerefMut for Redirect<'_> {
    fn deref_mut(&mut self) -> &mut OutputChannel {
        self.channel
    }
}

impl Drop for Redirect<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            self.channel.sink = previous;
            self.channel.redirections -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{self, AssertUnwindSafe};

    use super::*;

    #[test]
    fn test_redirect_captures_and_restores() {
        let outer = CaptureBuffer::new();
        let mut channel = OutputChannel::new(outer.clone());

        let inner = CaptureBuffer::new();
        {
            let mut guard = channel.redirect(inner.clone());
            assert!(guard.is_redirected());
            guard.write("a");
            guard.write("b\n");
        }
        channel.write("after");

        assert_eq!(inner.text(), "ab\n");
        assert_eq!(outer.text(), "after");
        assert!(!channel.is_redirected());
    }

    #[test]
    fn test_nested_redirects_unwind_in_order() {
        let base = CaptureBuffer::new();
        let mut channel = OutputChannel::new(base.clone());
        let first = CaptureBuffer::new();
        let second = CaptureBuffer::new();
        {
            let mut outer = channel.redirect(first.clone());
            {
                let mut inner = outer.redirect(second.clone());
                inner.write("2");
            }
            outer.write("1");
        }
        channel.write("0");

        assert_eq!(second.text(), "2");
        assert_eq!(first.text(), "1");
        assert_eq!(base.text(), "0");
    }

    #[test]
    fn test_redirect_restored_on_panic() {
        let base = CaptureBuffer::new();
        let mut channel = OutputChannel::new(base.clone());
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut guard = channel.redirect(CaptureBuffer::new());
            guard.write("lost");
            panic!("boom");
        }));
        assert!(result.is_err());

        channel.write("kept");
        assert_eq!(base.text(), "kept");
        assert!(!channel.is_redirected());
    }

    #[test]
    fn test_empty_buffer() {
        let mut buffer = CaptureBuffer::new();
        assert!(buffer.is_empty());
        buffer.write_text("");
        assert!(buffer.is_empty());
        buffer.write_text("x");
        assert!(!buffer.is_empty());
    }
}
