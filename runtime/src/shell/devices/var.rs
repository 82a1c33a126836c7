//! Write-only sink into a shell variable (`cmd > name`, `cmd >> name`).

use super::{Device, DeviceFuture, Item, ReadOpts, ReadResult};
use crate::shell::process::Process;
use crate::shell::session::Session;
use std::cell::Cell;
use std::rc::{Rc, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarMode {
    /// Each write replaces the value.
    Last,
    /// Each write appends to an array value.
    Array,
}

pub struct VarDevice {
    key: String,
    name: String,
    mode: VarMode,
    session: Weak<Session>,
    process: Rc<Process>,
    write_closed: Cell<bool>,
}

impl VarDevice {
    pub fn new(
        key: String,
        name: impl Into<String>,
        mode: VarMode,
        session: Weak<Session>,
        process: Rc<Process>,
    ) -> Self {
        Self {
            key,
            name: name.into(),
            mode,
            session,
            process,
            write_closed: Cell::new(false),
        }
    }
}

impl Device for VarDevice {
    fn key(&self) -> &str {
        &self.key
    }

    fn read(&self, _opts: ReadOpts) -> DeviceFuture<'_, ReadResult> {
        Box::pin(async { ReadResult::Eof })
    }

    fn write(&self, item: Item) -> DeviceFuture<'_, ()> {
        Box::pin(async move {
            if self.write_closed.get() {
                return;
            }
            let Some(session) = self.session.upgrade() else {
                return;
            };
            for value in item.into_values() {
                match self.mode {
                    VarMode::Last => session.assign_var(&self.process, &self.name, value),
                    VarMode::Array => session.append_var(&self.process, &self.name, value),
                }
            }
        })
    }

    fn close_read(&self) {}

    fn is_read_closed(&self) -> bool {
        true
    }

    fn close_write(&self) {
        self.write_closed.set(true);
    }

    fn is_write_closed(&self) -> bool {
        self.write_closed.get()
    }
}
