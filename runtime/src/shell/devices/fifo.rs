//! Bounded single-producer/single-consumer FIFO.

use super::{Device, DeviceFuture, Item, ReadOpts, ReadResult};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use tokio::sync::Notify;

pub struct FifoDevice {
    key: String,
    capacity: usize,
    queue: RefCell<VecDeque<Item>>,
    read_closed: Cell<bool>,
    write_closed: Cell<bool>,
    readable: Notify,
    writable: Notify,
}

impl FifoDevice {
    pub fn new(key: impl Into<String>, capacity: usize) -> Self {
        Self {
            key: key.into(),
            capacity: capacity.max(1),
            queue: RefCell::new(VecDeque::new()),
            read_closed: Cell::new(false),
            write_closed: Cell::new(false),
            readable: Notify::new(),
            writable: Notify::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    /// Take the next item without waiting.
    fn try_pop(&self, opts: ReadOpts) -> Option<Item> {
        let mut queue = self.queue.borrow_mut();
        loop {
            let front = queue.pop_front()?;
            let item = match front {
                Item::Chunk(mut values) if opts.exactly_one || !opts.forward_chunks => {
                    if values.is_empty() {
                        continue;
                    }
                    let first = values.remove(0);
                    if !values.is_empty() {
                        queue.push_front(Item::Chunk(values));
                    }
                    Item::Value(first)
                }
                Item::Chunk(values) if values.is_empty() => continue,
                other => other,
            };
            return Some(item);
        }
    }
}

impl Device for FifoDevice {
    fn key(&self) -> &str {
        &self.key
    }

    fn read(&self, opts: ReadOpts) -> DeviceFuture<'_, ReadResult> {
        Box::pin(async move {
            loop {
                if let Some(item) = self.try_pop(opts) {
                    // space freed: wake exactly one blocked writer
                    self.writable.notify_one();
                    return ReadResult::Data(item);
                }
                if self.write_closed.get() {
                    return ReadResult::Eof;
                }
                self.readable.notified().await;
            }
        })
    }

    fn write(&self, item: Item) -> DeviceFuture<'_, ()> {
        Box::pin(async move {
            loop {
                if self.read_closed.get() {
                    return;
                }
                if self.queue.borrow().len() < self.capacity {
                    self.queue.borrow_mut().push_back(item);
                    self.readable.notify_one();
                    return;
                }
                self.writable.notified().await;
            }
        })
    }

    fn close_read(&self) {
        self.read_closed.set(true);
        self.queue.borrow_mut().clear();
        self.writable.notify_one();
    }

    fn is_read_closed(&self) -> bool {
        self.read_closed.get()
    }

    fn is_broken(&self) -> bool {
        self.read_closed.get()
    }

    fn close_write(&self) {
        self.write_closed.set(true);
        self.readable.notify_one();
    }

    fn is_write_closed(&self) -> bool {
        self.write_closed.get()
    }
}
