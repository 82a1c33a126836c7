//! I/O devices.
//!
//! Every file descriptor in a process's table names a device by key. A
//! device moves JSON items: `read` yields one item or end-of-file, `write`
//! accepts one item and may suspend the caller. Devices never fail; errors
//! travel through the process kill mechanism instead.

mod fifo;
mod null;
mod speech;
mod terminal;
mod var;

pub use fifo::FifoDevice;
pub use null::NullDevice;
pub use speech::{LogSpeaker, Speaker, SpeechDevice};
pub use terminal::{TerminalDevice, TTY_KEY};
pub use var::{VarDevice, VarMode};

use serde_json::Value;
use std::future::Future;
use std::pin::Pin;

pub const NULL_KEY: &str = "/dev/null";
pub const VOICE_KEY: &str = "/dev/voice";

pub type DeviceFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// Unit of data moved between devices.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Value(Value),
    /// Ordered batch written atomically.
    Chunk(Vec<Value>),
}

impl Item {
    pub fn text(s: impl Into<String>) -> Self {
        Item::Value(Value::String(s.into()))
    }

    pub fn into_values(self) -> Vec<Value> {
        match self {
            Item::Value(v) => vec![v],
            Item::Chunk(values) => values,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOpts {
    /// Return a single value even when a chunk is queued.
    pub exactly_one: bool,
    /// Hand queued chunks over whole.
    pub forward_chunks: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReadResult {
    Data(Item),
    Eof,
}

pub trait Device {
    fn key(&self) -> &str;

    fn read(&self, opts: ReadOpts) -> DeviceFuture<'_, ReadResult>;

    fn write(&self, item: Item) -> DeviceFuture<'_, ()>;

    /// Reader is gone; pending and future writes are dropped.
    fn close_read(&self);

    fn is_read_closed(&self) -> bool;

    /// Nothing written here will ever be read.
    fn is_broken(&self) -> bool {
        false
    }

    /// Writer is gone; readers see end-of-file once drained.
    fn close_write(&self);

    fn is_write_closed(&self) -> bool;
}

/// Text form of an item value: strings verbatim, everything else as JSON.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(value_to_text)
            .collect::<Vec<_>>()
            .join(" "),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_to_text() {
        assert_eq!(value_to_text(&json!("a b")), "a b");
        assert_eq!(value_to_text(&json!(["x", 1])), "x 1");
        assert_eq!(value_to_text(&json!({"k": 1})), "{\"k\":1}");
        assert_eq!(value_to_text(&json!(null)), "");
    }
}
