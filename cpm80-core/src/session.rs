//! Terminal sessions: one machine per connected client, each on its own
//! thread.
//!
//! The registry maps a connection id to a session handle and is locked
//! only around insert, remove, and handle lookup; the machine itself is
//! owned by its thread. Input text from the transport is pushed into the
//! session's queue (FIFO, one wake-up per character); output flows through
//! the callback given at open time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::{debug, warn};

use crate::error::{CpmError, CpmResult};
use crate::machine::Machine;
use crate::terminal::{BufferedTerminal, InputHandle};

struct Session {
    input: InputHandle,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Session {
    fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.input.close();
        self.join();
    }

    fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("session thread panicked");
            }
        }
    }
}

/// Registry of live sessions.
#[derive(Default)]
pub struct SessionManager {
    sessions: Mutex<HashMap<u64, Session>>,
    next_id: AtomicU64,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session: build a machine around a buffered terminal, let
    /// `setup` seed its disk and program table, then boot it on a fresh
    /// thread. Returns the connection id.
    ///
    /// Any uncaught machine failure is reported through the output
    /// callback as a single `System error: ...` line before the session
    /// ends.
    pub fn open<F>(
        &self,
        output: impl FnMut(&str) + Send + 'static,
        setup: F,
    ) -> CpmResult<u64>
    where
        F: FnOnce(&mut Machine<BufferedTerminal>),
    {
        let term = BufferedTerminal::new(output);
        let input = term.handle();
        let mut machine = Machine::new(term);
        setup(&mut machine);
        let running = machine.stop_flag();

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let thread = std::thread::Builder::new()
            .name(format!("cpm-session-{id}"))
            .spawn(move || {
                if let Err(error) = machine.start() {
                    use crate::terminal::Terminal;
                    machine
                        .terminal_mut()
                        .write_line(&format!("System error: {error}"));
                }
                debug!(id, "session machine stopped");
            })?;

        let mut sessions = self.lock()?;
        sessions.insert(
            id,
            Session {
                input,
                running,
                thread: Some(thread),
            },
        );
        debug!(id, "session opened");
        Ok(id)
    }

    /// Deliver input text to a session's terminal queue.
    pub fn input(&self, id: u64, text: &str) -> CpmResult<()> {
        let handle = {
            let sessions = self.lock()?;
            sessions
                .get(&id)
                .ok_or(CpmError::SessionNotFound(id))?
                .input
                .clone()
        };
        handle.push_str(text);
        Ok(())
    }

    /// Transport closed: stop the machine, drain its thread, drop the
    /// session.
    pub fn close(&self, id: u64) -> CpmResult<()> {
        let session = self.lock()?.remove(&id);
        let mut session = session.ok_or(CpmError::SessionNotFound(id))?;
        session.shutdown();
        debug!(id, "session closed");
        Ok(())
    }

    /// Wait for a session to end on its own (EXIT or input EOF), then
    /// drop it.
    pub fn wait(&self, id: u64) -> CpmResult<()> {
        let session = self.lock()?.remove(&id);
        let mut session = session.ok_or(CpmError::SessionNotFound(id))?;
        session.join();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lock().map(|sessions| sessions.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> CpmResult<std::sync::MutexGuard<'_, HashMap<u64, Session>>> {
        self.sessions.lock().map_err(|_| CpmError::LockPoisoned)
    }
}
