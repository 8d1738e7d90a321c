//! Console I/O abstraction.
//!
//! The `Terminal` trait is the only surface the BIOS, BDOS, and CCP see.
//! `BufferedTerminal` is the reference implementation: a condvar-guarded
//! input queue fed by the transport side through an `InputHandle`, and an
//! output callback invoked from the machine's thread.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// Substitute/EOF character delivered once the input side is closed, so a
/// blocked reader always wakes up during shutdown.
pub const EOF_CHAR: char = '\u{1a}';

/// Character I/O for the emulated console.
pub trait Terminal: Send {
    fn write_char(&mut self, ch: char);

    fn write_str(&mut self, s: &str) {
        for ch in s.chars() {
            self.write_char(ch);
        }
    }

    fn write_line(&mut self, s: &str) {
        self.write_str(s);
        self.write_str("\r\n");
    }

    /// Block until one character is available.
    fn read_char(&mut self) -> char;

    /// Non-blocking: is a key waiting?
    fn key_available(&self) -> bool;

    /// True once the input side is closed and drained; readers see
    /// [`EOF_CHAR`] from then on.
    fn at_eof(&self) -> bool {
        false
    }

    /// Line editor: echoes, handles backspace/DEL, terminates on CR or LF
    /// and emits CRLF to the terminal.
    fn read_line(&mut self) -> String {
        let mut line = String::new();
        loop {
            let ch = self.read_char();
            match ch {
                '\r' | '\n' => {
                    self.write_str("\r\n");
                    return line;
                }
                '\u{8}' | '\u{7f}' => {
                    if line.pop().is_some() {
                        self.write_str("\u{8} \u{8}");
                    }
                }
                EOF_CHAR => return line,
                ch if (ch as u32) >= 0x20 => {
                    line.push(ch);
                    self.write_char(ch);
                }
                _ => {}
            }
        }
    }
}

#[derive(Default)]
struct InputQueue {
    chars: Mutex<VecDeque<char>>,
    ready: Condvar,
    closed: AtomicBool,
}

/// Transport-side handle for feeding characters into a terminal.
#[derive(Clone)]
pub struct InputHandle {
    queue: Arc<InputQueue>,
}

impl InputHandle {
    pub fn push_char(&self, ch: char) {
        let mut chars = self.queue.chars.lock().unwrap_or_else(|e| e.into_inner());
        chars.push_back(ch);
        self.queue.ready.notify_one();
    }

    pub fn push_str(&self, s: &str) {
        let mut chars = self.queue.chars.lock().unwrap_or_else(|e| e.into_inner());
        chars.extend(s.chars());
        self.queue.ready.notify_one();
    }

    /// Close the input side; blocked readers wake and see EOF once the
    /// queue drains.
    pub fn close(&self) {
        self.queue.closed.store(true, Ordering::SeqCst);
        self.queue.ready.notify_all();
    }
}

/// Shared capture buffer for headless runs and tests.
#[derive(Clone, Default)]
pub struct OutputBuffer {
    text: Arc<Mutex<String>>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        self.text.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn clear(&self) {
        self.text.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn append(&self, s: &str) {
        self.text.lock().unwrap_or_else(|e| e.into_inner()).push_str(s);
    }
}

type OutputFn = Box<dyn FnMut(&str) + Send>;

/// Reference terminal: FIFO input queue plus an output callback.
pub struct BufferedTerminal {
    queue: Arc<InputQueue>,
    output: OutputFn,
}

impl BufferedTerminal {
    pub fn new(output: impl FnMut(&str) + Send + 'static) -> Self {
        Self {
            queue: Arc::new(InputQueue::default()),
            output: Box::new(output),
        }
    }

    /// Headless terminal: input pre-queued and already closed, output
    /// captured in the returned buffer. Reads never block.
    pub fn headless(input: &str) -> (Self, OutputBuffer) {
        let buffer = OutputBuffer::new();
        let sink = buffer.clone();
        let term = Self::new(move |s| sink.append(s));
        let handle = term.handle();
        handle.push_str(input);
        handle.close();
        (term, buffer)
    }

    /// Handle for the transport side; clones share the same queue.
    pub fn handle(&self) -> InputHandle {
        InputHandle {
            queue: Arc::clone(&self.queue),
        }
    }
}

impl Terminal for BufferedTerminal {
    fn write_char(&mut self, ch: char) {
        let mut buf = [0u8; 4];
        (self.output)(ch.encode_utf8(&mut buf));
    }

    fn write_str(&mut self, s: &str) {
        (self.output)(s);
    }

    fn read_char(&mut self) -> char {
        let mut chars = self.queue.chars.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(ch) = chars.pop_front() {
                return ch;
            }
            if self.queue.closed.load(Ordering::SeqCst) {
                return EOF_CHAR;
            }
            chars = self
                .queue
                .ready
                .wait(chars)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    fn key_available(&self) -> bool {
        !self
            .queue
            .chars
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }

    fn at_eof(&self) -> bool {
        self.queue.closed.load(Ordering::SeqCst) && !self.key_available()
    }
}
