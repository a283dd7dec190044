//! Camera entity
//!
//! Images are cached in a single newest-wins slot and sent to the hub as
//! 1024-byte chunks, the last one marked `done`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::watch;

use super::{Entity, EntityInfo, StateStream};
use crate::Result;
use crate::proto::{CameraImageResponse, ListEntitiesCameraResponse, ProtocolMessage};

/// Size of each image chunk on the wire
pub const CAMERA_CHUNK_SIZE: usize = 1024;

/// Camera with a single-slot image cache
pub struct CameraEntity {
    info: EntityInfo,
    image: watch::Sender<Option<Arc<Vec<u8>>>>,
    streaming: AtomicBool,
    sending: Arc<AtomicBool>,
}

/// Releases the in-flight flag when the last chunk has been taken
struct SendingGuard(Arc<AtomicBool>);

impl SendingGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for SendingGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Split an image into wire chunks; an empty image yields one empty final chunk
#[must_use]
pub fn chunk_image(key: u32, image: &[u8]) -> Vec<ProtocolMessage> {
    if image.is_empty() {
        return vec![
            CameraImageResponse {
                key,
                data: Vec::new(),
                done: true,
            }
            .into(),
        ];
    }

    let count = image.len().div_ceil(CAMERA_CHUNK_SIZE);
    image
        .chunks(CAMERA_CHUNK_SIZE)
        .enumerate()
        .map(|(i, chunk)| {
            CameraImageResponse {
                key,
                data: chunk.to_vec(),
                done: i + 1 == count,
            }
            .into()
        })
        .collect()
}

impl CameraEntity {
    #[must_use]
    pub fn new(info: EntityInfo) -> Self {
        let (image, _) = watch::channel(None);
        Self {
            info,
            image,
            streaming: AtomicBool::new(false),
            sending: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replace the cached image and notify subscribers
    pub fn send_image(&self, jpeg: Vec<u8>) {
        self.image.send_replace(Some(Arc::new(jpeg)));
    }

    /// Whether the hub asked for a continuous stream
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Entity for CameraEntity {
    fn key(&self) -> u32 {
        self.info.key
    }

    fn object_id(&self) -> &str {
        &self.info.object_id
    }

    fn describe(&self) -> ProtocolMessage {
        ListEntitiesCameraResponse {
            object_id: self.info.object_id.clone(),
            key: self.info.key,
            name: self.info.name.clone(),
            unique_id: self.info.object_id.clone(),
            disabled_by_default: self.info.disabled_by_default,
            icon: self.info.icon_or_empty(),
            entity_category: self.info.category_i32(),
        }
        .into()
    }

    async fn handle(&self, message: &ProtocolMessage) -> Result<Vec<ProtocolMessage>> {
        let ProtocolMessage::CameraImageRequest(request) = message else {
            return Ok(Vec::new());
        };

        if request.stream {
            self.streaming.store(true, Ordering::Release);
        }

        if request.single {
            let cached = self.image.borrow().clone();
            if let Some(image) = cached {
                return Ok(chunk_image(self.info.key, &image));
            }
        }

        Ok(Vec::new())
    }

    /// Chunks of every new image; an image arriving while another is still
    /// being sent is dropped
    fn subscribe(&self) -> StateStream {
        struct Pending {
            rx: watch::Receiver<Option<Arc<Vec<u8>>>>,
            chunks: VecDeque<ProtocolMessage>,
            // Held for its `Drop`
            #[allow(dead_code)]
            in_flight: Option<SendingGuard>,
            first: bool,
        }

        let key = self.info.key;
        let sending = Arc::clone(&self.sending);
        let state = Pending {
            rx: self.image.subscribe(),
            chunks: VecDeque::new(),
            in_flight: None,
            first: true,
        };

        futures::stream::unfold(state, move |mut state| {
            let sending = Arc::clone(&sending);
            async move {
                loop {
                    if let Some(chunk) = state.chunks.pop_front() {
                        return Some((chunk, state));
                    }
                    state.in_flight = None;

                    if state.first {
                        state.first = false;
                        state.rx.mark_changed();
                    }
                    state.rx.changed().await.ok()?;
                    let latest = state.rx.borrow_and_update().clone();
                    let Some(image) = latest else {
                        continue;
                    };

                    match SendingGuard::acquire(&sending) {
                        Some(guard) => {
                            state.in_flight = Some(guard);
                            state.chunks = chunk_image(key, &image).into();
                        }
                        None => {
                            tracing::debug!(key, "camera image dropped, transmission in flight");
                        }
                    }
                }
            }
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::CameraImageRequest;

    fn reassemble(chunks: &[ProtocolMessage]) -> (Vec<u8>, Vec<bool>) {
        let mut data = Vec::new();
        let mut done = Vec::new();
        for chunk in chunks {
            let ProtocolMessage::CameraImageResponse(c) = chunk else {
                panic!("unexpected message");
            };
            data.extend_from_slice(&c.data);
            done.push(c.done);
        }
        (data, done)
    }

    #[test]
    fn test_chunk_round_trip_lengths() {
        for len in [0, 1, 1023, 1024, 1025, 4096, 5000] {
            let image: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let (data, done) = reassemble(&chunk_image(1, &image));
            assert_eq!(data, image, "length {len}");
            assert_eq!(done.iter().filter(|d| **d).count(), 1);
            assert_eq!(done.last(), Some(&true));
        }
    }

    #[tokio::test]
    async fn test_single_request_uses_cache() {
        let camera = CameraEntity::new(EntityInfo::new(11, "Camera", "camera"));
        let request: ProtocolMessage = CameraImageRequest {
            single: true,
            stream: false,
        }
        .into();

        assert!(camera.handle(&request).await.unwrap().is_empty());

        camera.send_image(vec![1; 10]);
        camera.send_image(vec![2; 2000]);
        let (data, _) = reassemble(&camera.handle(&request).await.unwrap());
        assert_eq!(data, vec![2; 2000]);
        assert!(!camera.is_streaming());
    }

    #[tokio::test]
    async fn test_stream_request_sets_flag() {
        let camera = CameraEntity::new(EntityInfo::new(11, "Camera", "camera"));
        camera
            .handle(
                &CameraImageRequest {
                    single: false,
                    stream: true,
                }
                .into(),
            )
            .await
            .unwrap();
        assert!(camera.is_streaming());
    }

    #[tokio::test]
    async fn test_image_during_transmission_dropped() {
        use futures::{FutureExt, StreamExt};

        let camera = CameraEntity::new(EntityInfo::new(11, "Camera", "camera"));
        let mut first = camera.subscribe();
        let mut second = camera.subscribe();

        camera.send_image(vec![7; 3000]);
        let chunk = first.next().await.unwrap();
        assert!(matches!(chunk, ProtocolMessage::CameraImageResponse(ref c) if !c.done));

        // First subscriber holds the in-flight slot, so the second one drops
        // both the current image and one arriving mid-transmission
        assert!(second.next().now_or_never().is_none());
        camera.send_image(vec![8; 10]);
        assert!(second.next().now_or_never().is_none());

        let rest: Vec<_> = first.by_ref().take(2).collect().await;
        let (_, done) = reassemble(&rest);
        assert_eq!(done, vec![false, true]);

        // Slot is released once the consumer asks past the last chunk
        let ProtocolMessage::CameraImageResponse(c) = first.next().await.unwrap() else {
            panic!("unexpected message");
        };
        assert_eq!(c.data, vec![8; 10]);
        assert!(c.done);
    }
}
