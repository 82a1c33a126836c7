use super::{Device, DeviceFuture, Item, ReadOpts, ReadResult, NULL_KEY};

/// Discards writes; reads are immediately at end-of-file.
#[derive(Debug, Default)]
pub struct NullDevice;

impl Device for NullDevice {
    fn key(&self) -> &str {
        NULL_KEY
    }

    fn read(&self, _opts: ReadOpts) -> DeviceFuture<'_, ReadResult> {
        Box::pin(async { ReadResult::Eof })
    }

    fn write(&self, _item: Item) -> DeviceFuture<'_, ()> {
        Box::pin(async {})
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
