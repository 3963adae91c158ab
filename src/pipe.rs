//! Pattern pipes.
//!
//! A pattern pipe copies a byte stream line by line (`\n` or `\r\n`),
//! prepends a caller-supplied prefix, writes the result to a shared
//! [`LineSink`], and fires a hook for every regex that matches the line.
//! Hooks are synchronous and must return quickly. The pipe stops on EOF,
//! reports read errors through a single error callback, and never closes
//! the sink.

use parking_lot::Mutex;
use regex::Regex;
use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

type Hook = Box<dyn Fn(&str) + Send + Sync>;
type ErrorHook = Box<dyn Fn(io::Error) + Send + Sync>;

/// Destination for prefixed output lines. Implementations write whole lines
/// under their own lock so concurrent pipes interleave at line granularity.
pub trait LineSink: Send + Sync {
    fn write_line(&self, line: &str);
}

/// Sink that forwards to the process stdout.
pub struct StdoutSink;

impl LineSink for StdoutSink {
    fn write_line(&self, line: &str) {
        // stdout's own lock gives the line-granularity guarantee
        let mut out = io::stdout().lock();
        let _ = writeln!(out, "{}", line);
    }
}

/// Ring-buffer sink keeping the most recent lines in memory.
pub struct BufferSink {
    lines: Mutex<VecDeque<String>>,
    max_lines: usize,
}

impl BufferSink {
    pub fn new(max_lines: usize) -> Self {
        Self {
            lines: Mutex::new(VecDeque::new()),
            max_lines,
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().iter().cloned().collect()
    }
}

impl LineSink for BufferSink {
    fn write_line(&self, line: &str) {
        let mut lines = self.lines.lock();
        lines.push_back(line.to_string());
        if lines.len() > self.max_lines {
            lines.pop_front();
        }
    }
}

pub struct PatternPipe {
    prefix: String,
    sink: Arc<dyn LineSink>,
    hooks: Vec<(Regex, Hook)>,
    on_error: Option<ErrorHook>,
}

impl PatternPipe {
    pub fn new(prefix: impl Into<String>, sink: Arc<dyn LineSink>) -> Self {
        Self {
            prefix: prefix.into(),
            sink,
            hooks: Vec::new(),
            on_error: None,
        }
    }

    /// Register a hook fired once per line on which `pattern` matches
    /// anywhere. Multiple hooks may fire for the same line.
    pub fn hook(mut self, pattern: Regex, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.hooks.push((pattern, Box::new(callback)));
        self
    }

    /// Register the single error callback for read failures.
    pub fn on_error(mut self, callback: impl Fn(io::Error) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }

    /// Copy the stream until EOF or a read error.
    pub async fn run<R: AsyncRead + Unpin>(self, reader: R) {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    self.sink
                        .write_line(&format!("{}{}", self.prefix, line));
                    for (pattern, hook) in &self.hooks {
                        if pattern.is_match(&line) {
                            hook(&line);
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    match &self.on_error {
                        Some(callback) => callback(e),
                        None => tracing::error!("pipe read error: {}", e),
                    }
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::RegexBuilder;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pattern(p: &str) -> Regex {
        RegexBuilder::new(p).case_insensitive(true).build().unwrap()
    }

    #[tokio::test]
    async fn prefixes_every_line() {
        let sink = Arc::new(BufferSink::new(100));
        let pipe = PatternPipe::new("[svc]: ", sink.clone());
        pipe.run(&b"one\ntwo\nthree\n"[..]).await;
        assert_eq!(sink.lines(), vec!["[svc]: one", "[svc]: two", "[svc]: three"]);
    }

    #[tokio::test]
    async fn handles_crlf_line_endings() {
        let sink = Arc::new(BufferSink::new(100));
        let pipe = PatternPipe::new("> ", sink.clone());
        pipe.run(&b"a\r\nb\r\n"[..]).await;
        assert_eq!(sink.lines(), vec!["> a", "> b"]);
    }

    #[tokio::test]
    async fn fires_hook_once_per_matching_line() {
        let sink = Arc::new(BufferSink::new(100));
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let pipe = PatternPipe::new("", sink).hook(pattern("ready"), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        pipe.run(&b"starting\nready now\nstill ready\ndone\n"[..])
            .await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn match_is_unanchored_and_case_insensitive() {
        let sink = Arc::new(BufferSink::new(100));
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let pipe = PatternPipe::new("", sink).hook(pattern("is (up|running)"), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        pipe.run(&b"The Service IS UP now\n"[..]).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn all_matching_hooks_fire_for_one_line() {
        let sink = Arc::new(BufferSink::new(100));
        let hits = Arc::new(AtomicUsize::new(0));
        let first = hits.clone();
        let second = hits.clone();
        let pipe = PatternPipe::new("", sink)
            .hook(pattern("listening"), move |_| {
                first.fetch_add(1, Ordering::SeqCst);
            })
            .hook(pattern("port \\d+"), move |_| {
                second.fetch_add(1, Ordering::SeqCst);
            });
        pipe.run(&b"listening on port 8080\n"[..]).await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn buffer_sink_evicts_oldest_lines() {
        let sink = BufferSink::new(2);
        sink.write_line("a");
        sink.write_line("b");
        sink.write_line("c");
        assert_eq!(sink.lines(), vec!["b", "c"]);
    }
}
