//! Rendering-independent media consumer.

use super::stream::StreamHandle;

/// Something that consumes a remote stream (a renderer, a recorder).
///
/// The registry calls `attach` when a stream becomes available for the
/// sink's slot, and `detach` when it goes away.
pub trait MediaSink: Send + Sync {
    fn attach(&mut self, stream: StreamHandle);
    fn detach(&mut self);
}
