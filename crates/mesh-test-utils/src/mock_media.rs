//! Mock local media controller for mesh testing.
//!
//! Hands out one shared capture per request, or fails the way a real device
//! layer does when permission is denied.

use async_trait::async_trait;
use common::types::ParticipantId;
use mesh_coordinator::errors::MediaError;
use mesh_coordinator::media::{LocalMediaController, MediaTrack, StreamHandle, StreamKind, TrackKind};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct MockMediaController {
    deny_camera: AtomicBool,
    deny_screen: AtomicBool,
    camera_requests: AtomicUsize,
    screen_requests: AtomicUsize,
    releases: AtomicUsize,
    toggles: Mutex<Vec<(TrackKind, bool)>>,
}

impl MockMediaController {
    /// Controller that grants every request.
    #[must_use]
    pub fn accepting() -> Self {
        Self::default()
    }

    /// Controller whose camera request is denied.
    #[must_use]
    pub fn denying() -> Self {
        let controller = Self::default();
        controller.deny_camera.store(true, Ordering::SeqCst);
        controller
    }

    pub fn set_deny_screen(&self, enabled: bool) {
        self.deny_screen.store(enabled, Ordering::SeqCst);
    }

    #[must_use]
    pub fn camera_requests(&self) -> usize {
        self.camera_requests.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn screen_requests(&self) -> usize {
        self.screen_requests.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Device toggles in call order.
    #[must_use]
    pub fn toggles(&self) -> Vec<(TrackKind, bool)> {
        self.toggles.lock().unwrap().clone()
    }
}

#[async_trait]
impl LocalMediaController for MockMediaController {
    async fn acquire_camera(
        &self,
        owner: &ParticipantId,
        video: bool,
        audio: bool,
    ) -> Result<StreamHandle, MediaError> {
        self.camera_requests.fetch_add(1, Ordering::SeqCst);
        if self.deny_camera.load(Ordering::SeqCst) {
            return Err(MediaError::PermissionDenied("camera".to_string()));
        }

        let mut tracks = Vec::new();
        if audio {
            tracks.push(MediaTrack::new(format!("{owner}-mic"), TrackKind::Audio));
        }
        if video {
            tracks.push(MediaTrack::new(format!("{owner}-cam"), TrackKind::Video));
        }
        Ok(StreamHandle::new(owner.clone(), StreamKind::Camera, tracks))
    }

    async fn acquire_screen_share(&self, owner: &ParticipantId) -> Result<StreamHandle, MediaError> {
        self.screen_requests.fetch_add(1, Ordering::SeqCst);
        if self.deny_screen.load(Ordering::SeqCst) {
            return Err(MediaError::PermissionDenied("screen".to_string()));
        }
        Ok(StreamHandle::new(
            owner.clone(),
            StreamKind::ScreenShare,
            vec![MediaTrack::new(format!("{owner}-screen"), TrackKind::Video)],
        ))
    }

    async fn set_enabled(&self, kind: TrackKind, enabled: bool) {
        self.toggles.lock().unwrap().push((kind, enabled));
    }

    async fn release(&self, _stream: &StreamHandle) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_camera_capture_has_both_tracks() {
        let media = MockMediaController::accepting();
        let camera = media
            .acquire_camera(&ParticipantId::from("111"), true, true)
            .await
            .unwrap();
        assert_eq!(camera.kind(), StreamKind::Camera);
        assert!(camera.has_track(TrackKind::Audio));
        assert!(camera.has_track(TrackKind::Video));
        assert_eq!(media.camera_requests(), 1);
    }

    #[tokio::test]
    async fn test_denying_controller() {
        let media = MockMediaController::denying();
        let result = media.acquire_camera(&ParticipantId::from("111"), true, true).await;
        assert!(matches!(result, Err(MediaError::PermissionDenied(_))));
    }
}
