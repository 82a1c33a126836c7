//! Speech sink.
//!
//! Utterances are served strictly in write order: each write takes a
//! ticket and waits until every earlier ticket has finished speaking. A
//! writer dropped while waiting (killed) gives its turn away.

use super::{value_to_text, Device, DeviceFuture, Item, ReadOpts, ReadResult, VOICE_KEY};
use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::rc::Rc;
use std::time::Duration;
use tokio::sync::Notify;

/// Backend that voices one utterance.
pub trait Speaker {
    fn speak<'a>(&'a self, text: &'a str) -> DeviceFuture<'a, ()>;
}

/// Logs each utterance and takes time proportional to its length.
#[derive(Debug, Clone)]
pub struct LogSpeaker {
    pub ms_per_char: u64,
}

impl Speaker for LogSpeaker {
    fn speak<'a>(&'a self, text: &'a str) -> DeviceFuture<'a, ()> {
        Box::pin(async move {
            tracing::info!(text, "speaking");
            let ms = self.ms_per_char.saturating_mul(text.chars().count() as u64);
            tokio::time::sleep(Duration::from_millis(ms)).await;
        })
    }
}

pub struct SpeechDevice {
    speaker: Rc<dyn Speaker>,
    next_ticket: Cell<u64>,
    serving: Cell<u64>,
    abandoned: RefCell<BTreeSet<u64>>,
    turn: Notify,
}

impl SpeechDevice {
    pub fn new(speaker: Rc<dyn Speaker>) -> Self {
        Self {
            speaker,
            next_ticket: Cell::new(0),
            serving: Cell::new(0),
            abandoned: RefCell::new(BTreeSet::new()),
            turn: Notify::new(),
        }
    }

    /// Move past `ticket` and any abandoned tickets queued after it.
    fn advance(&self) {
        let mut next = self.serving.get() + 1;
        let mut abandoned = self.abandoned.borrow_mut();
        while abandoned.remove(&next) {
            next += 1;
        }
        self.serving.set(next);
        self.turn.notify_waiters();
    }
}

struct Ticket<'a> {
    device: &'a SpeechDevice,
    number: u64,
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        if self.device.serving.get() == self.number {
            self.device.advance();
        } else {
            self.device.abandoned.borrow_mut().insert(self.number);
        }
    }
}

impl Device for SpeechDevice {
    fn key(&self) -> &str {
        VOICE_KEY
    }

    fn read(&self, _opts: ReadOpts) -> DeviceFuture<'_, ReadResult> {
        Box::pin(async { ReadResult::Eof })
    }

    fn write(&self, item: Item) -> DeviceFuture<'_, ()> {
        // the ticket is taken at call time so order follows calls, not polls
        let number = self.next_ticket.get();
        self.next_ticket.set(number + 1);
        let ticket = Ticket {
            device: self,
            number,
        };
        Box::pin(async move {
            let _ticket = ticket;
            loop {
                let turn = self.turn.notified();
                if self.serving.get() == number {
                    break;
                }
                turn.await;
            }

            for value in item.into_values() {
                let text = value_to_text(&value);
                self.speaker.speak(&text).await;
            }
        })
    }

    fn close_read(&self) {}

    fn is_read_closed(&self) -> bool {
        true
    }

    fn close_write(&self) {}

    fn is_write_closed(&self) -> bool {
        false
    }
}
