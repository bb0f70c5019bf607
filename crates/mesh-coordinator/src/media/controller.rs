//! Local Media Controller seam.

use super::stream::{StreamHandle, TrackKind};
use crate::errors::MediaError;
use common::types::ParticipantId;

/// Access to the local capture devices.
///
/// Implementations hand out one [`StreamHandle`] per capture; the coordinator
/// shares that handle with every peer link rather than asking for copies.
#[async_trait::async_trait]
pub trait LocalMediaController: Send + Sync {
    /// Acquire camera and/or microphone, owned by `owner`.
    async fn acquire_camera(
        &self,
        owner: &ParticipantId,
        video: bool,
        audio: bool,
    ) -> Result<StreamHandle, MediaError>;

    /// Acquire a screen capture, owned by `owner`.
    async fn acquire_screen_share(&self, owner: &ParticipantId)
        -> Result<StreamHandle, MediaError>;

    /// Turn the device behind the local camera capture on or off.
    async fn set_enabled(&self, kind: TrackKind, enabled: bool);

    /// Release a capture the coordinator no longer needs.
    async fn release(&self, _stream: &StreamHandle) {}
}
