//! GUI-owning execution context
//!
//! Pipeline construction, teardown and every window operation run on one
//! dedicated thread. Other threads hand work to it with
//! [`GuiHandle::invoke_blocking`], which waits until the task has run.
//! Never call it from inside an async task; go through `spawn_blocking`.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

type Task = Box<dyn FnOnce() + Send>;

enum Message {
    Run(Task),
    Quit,
}

/// The GUI context stopped before the task could complete
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("GUI context is not running")]
pub struct GuiUnavailable;

/// Receiving half; drained by the owning thread
pub struct GuiLoop {
    receiver: mpsc::UnboundedReceiver<Message>,
    owner: Arc<OnceLock<ThreadId>>,
}

/// Cloneable sender side of the GUI context
#[derive(Clone)]
pub struct GuiHandle {
    sender: mpsc::UnboundedSender<Message>,
    owner: Arc<OnceLock<ThreadId>>,
}

impl GuiLoop {
    pub fn channel() -> (Self, GuiHandle) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let owner = Arc::new(OnceLock::new());
        (
            Self {
                receiver,
                owner: Arc::clone(&owner),
            },
            GuiHandle { sender, owner },
        )
    }

    /// Run on a new thread named `gui`
    pub fn spawn() -> std::io::Result<(GuiHandle, JoinHandle<()>)> {
        let (gui_loop, handle) = Self::channel();
        let thread = thread::Builder::new()
            .name("gui".to_string())
            .spawn(move || gui_loop.run())?;
        Ok((handle, thread))
    }

    /// Serve tasks on the current thread until told to quit or every
    /// handle is gone
    pub fn run(mut self) {
        let _ = self.owner.set(thread::current().id());
        log::debug!("GUI loop running");

        while let Some(message) = self.receiver.blocking_recv() {
            match message {
                Message::Run(task) => {
                    if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                        log::error!("GUI task panicked");
                    }
                }
                Message::Quit => break,
            }
        }

        log::debug!("GUI loop stopped");
    }
}

impl GuiHandle {
    /// Whether the caller is the GUI-owning thread
    pub fn is_gui_thread(&self) -> bool {
        self.owner.get() == Some(&thread::current().id())
    }

    /// Run `f` on the GUI thread and wait for its result.
    ///
    /// Runs inline when already on the GUI thread.
    pub fn invoke_blocking<F, R>(&self, f: F) -> Result<R, GuiUnavailable>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_gui_thread() {
            return Ok(f());
        }

        let (reply, result) = oneshot::channel();
        let task: Task = Box::new(move || {
            let _ = reply.send(f());
        });
        self.sender
            .send(Message::Run(task))
            .map_err(|_| GuiUnavailable)?;

        // Dropped without a reply when the task panics or the loop exits first
        result.blocking_recv().map_err(|_| GuiUnavailable)
    }

    /// Ask the loop to stop after the tasks already queued
    pub fn quit(&self) {
        let _ = self.sender.send(Message::Quit);
    }
}
