//! The session's terminal.
//!
//! Output goes to the UI as `Line` messages. Input is only available
//! through one-shot reads: a reader registers a pending request which the
//! terminal driver resolves with the next submitted line, or rejects when
//! the user interrupts.

use super::{value_to_text, Device, DeviceFuture, Item, ReadOpts, ReadResult};
use crate::interactive::ShellToUi;
use async_channel::Sender;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::VecDeque;
use tokio::sync::oneshot;

pub const TTY_KEY: &str = "/dev/tty";

pub struct TerminalDevice {
    ui: Sender<ShellToUi>,
    pending_reads: RefCell<VecDeque<oneshot::Sender<String>>>,
    last_value: RefCell<Option<Value>>,
}

impl TerminalDevice {
    pub fn new(ui: Sender<ShellToUi>) -> Self {
        Self {
            ui,
            pending_reads: RefCell::new(VecDeque::new()),
            last_value: RefCell::new(None),
        }
    }

    pub fn send(&self, msg: ShellToUi) {
        if self.ui.try_send(msg).is_err() {
            tracing::debug!("terminal ui channel closed");
        }
    }

    pub fn info(&self, msg: impl Into<String>) {
        self.send(ShellToUi::Info { msg: msg.into() });
    }

    pub fn error(&self, msg: impl Into<String>) {
        self.send(ShellToUi::Error { msg: msg.into() });
    }

    pub fn has_pending_read(&self) -> bool {
        let mut pending = self.pending_reads.borrow_mut();
        pending.retain(|tx| !tx.is_closed());
        !pending.is_empty()
    }

    /// Hand `line` to the oldest pending reader. Returns false if none.
    pub fn resolve_read(&self, line: String) -> bool {
        let mut line = line;
        loop {
            let Some(tx) = self.pending_reads.borrow_mut().pop_front() else {
                return false;
            };
            match tx.send(line) {
                Ok(()) => return true,
                // reader went away; try the next one
                Err(returned) => line = returned,
            }
        }
    }

    /// Fail every pending read; readers observe end-of-file.
    pub fn reject_reads(&self) {
        self.pending_reads.borrow_mut().clear();
    }

    /// Last non-string value written to the terminal (`$_`).
    pub fn last_value(&self) -> Option<Value> {
        self.last_value.borrow().clone()
    }
}

impl Device for TerminalDevice {
    fn key(&self) -> &str {
        TTY_KEY
    }

    fn read(&self, _opts: ReadOpts) -> DeviceFuture<'_, ReadResult> {
        let (tx, rx) = oneshot::channel();
        self.pending_reads.borrow_mut().push_back(tx);
        Box::pin(async move {
            match rx.await {
                Ok(line) => ReadResult::Data(Item::text(line)),
                Err(_) => ReadResult::Eof,
            }
        })
    }

    fn write(&self, item: Item) -> DeviceFuture<'_, ()> {
        Box::pin(async move {
            for value in item.into_values() {
                if !value.is_string() {
                    *self.last_value.borrow_mut() = Some(value.clone());
                }
                self.send(ShellToUi::Line {
                    text: value_to_text(&value),
                });
            }
        })
    }

    fn close_read(&self) {}

    fn is_read_closed(&self) -> bool {
        false
    }

    fn close_write(&self) {}

    fn is_write_closed(&self) -> bool {
        false
    }
}
