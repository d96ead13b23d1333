use super::PublishSink;
use crate::error::{PipelineError, Result};
use image::RgbImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

/// One outgoing track in the publish set, grouped by stream name.
#[derive(Debug, Clone)]
pub struct PublishedTrack {
    pub stream: String,
    pub kind: TrackKind,
}

/// Owns the outgoing track set for one participant identity.
///
/// The raw camera and microphone publish under the identity itself; the
/// composited feed publishes under an identity-derived stream name. Swapping
/// the composited feed in unpublishes the raw tracks, and re-entering the
/// swap (for example after a device change) first removes the previous
/// composited tracks so no duplicates go out.
pub struct StreamPublisher {
    identity: String,
    tracks: Vec<PublishedTrack>,
    sink: Option<Box<dyn PublishSink>>,
}

impl StreamPublisher {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            tracks: Vec::new(),
            sink: None,
        }
    }

    /// Stream name grouping the composited video and its companion audio.
    pub fn stream_name(&self) -> String {
        format!("{}-composite", self.identity)
    }

    /// Register the raw camera and microphone tracks.
    pub fn publish_camera(&mut self) {
        self.tracks.push(PublishedTrack {
            stream: self.identity.clone(),
            kind: TrackKind::Video,
        });
        self.tracks.push(PublishedTrack {
            stream: self.identity.clone(),
            kind: TrackKind::Audio,
        });
        tracing::debug!("Published raw camera tracks for {}", self.identity);
    }

    /// Exchange the composited feed for the raw camera in the outgoing set:
    /// the sink becomes the published video track, a companion audio track
    /// keeps the same stream grouping, and the raw tracks are unpublished.
    pub fn publish_composite(&mut self, sink: Box<dyn PublishSink>) {
        let stream = self.stream_name();

        // Re-entry: drop any composited tracks left from a previous attach
        self.tracks.retain(|track| track.stream != stream);

        self.tracks.push(PublishedTrack {
            stream: stream.clone(),
            kind: TrackKind::Video,
        });
        self.tracks.push(PublishedTrack {
            stream: stream.clone(),
            kind: TrackKind::Audio,
        });
        self.sink = Some(sink);

        // Swap: everything not under the composited stream name goes
        self.tracks.retain(|track| track.stream == stream);
        tracing::info!("Composited feed published as {stream}");
    }

    pub fn is_publishing(&self) -> bool {
        self.sink.is_some()
    }

    /// Push one rendered frame out through the published video track.
    pub fn push_frame(&mut self, frame: &RgbImage) -> Result<()> {
        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| PipelineError::Sink("no feed is published".into()))?;
        sink.write_frame(frame)
    }

    pub fn tracks(&self) -> &[PublishedTrack] {
        &self.tracks
    }

    /// Stop all outgoing tracks and release the sink. Safe to call twice.
    pub fn detach(&mut self) {
        if self.sink.take().is_some() || !self.tracks.is_empty() {
            tracing::info!("Unpublished all tracks for {}", self.identity);
        }
        self.tracks.clear();
    }
}
