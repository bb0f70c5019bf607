//! Media streams: local capture, inbound classification and consumption.

pub mod classifier;
pub mod controller;
pub mod registry;
pub mod sink;
pub mod stream;

pub use classifier::{classify, Classified, RemoteStreams};
pub use controller::LocalMediaController;
pub use registry::StreamRegistry;
pub use sink::MediaSink;
pub use stream::{InboundStream, MediaTrack, StreamHandle, StreamKind, TrackInfo, TrackKind};
