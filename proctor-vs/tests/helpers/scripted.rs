//! Scripted collaborators
//!
//! The detector's behaviour is encoded in the test image itself: the red
//! channel of pixel (0, 0) selects a [`Marker`]. Concurrent alerts can then
//! be scripted individually without relying on scheduling order.

use async_trait::async_trait;
use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use proctor_vs::collab::{
    ArtifactRef, DetectorError, FaceDetector, JsonReportRenderer, RenderError, ReportRenderer,
};
use proctor_vs::models::{BoundingBox, Detection, ReportBody};

/// Scripted detector behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// One confident face
    Face,
    /// Two faces, one below the default threshold
    FaceAndShadow,
    /// Nothing detected
    NoFace,
    /// Only low-confidence detections
    Blurry,
    /// Answers after 300ms with one face
    Slow,
    /// Never answers (per-attempt timeout fires)
    Hang,
    /// Model endpoint down on every attempt
    Unavailable,
    /// Detector panics
    Panic,
}

impl Marker {
    fn red(self) -> u8 {
        match self {
            Marker::Face => 250,
            Marker::FaceAndShadow => 230,
            Marker::NoFace => 10,
            Marker::Blurry => 40,
            Marker::Slow => 200,
            Marker::Hang => 128,
            Marker::Unavailable => 64,
            Marker::Panic => 32,
        }
    }

    fn from_red(red: u8) -> Option<Self> {
        [
            Marker::Face,
            Marker::FaceAndShadow,
            Marker::NoFace,
            Marker::Blurry,
            Marker::Slow,
            Marker::Hang,
            Marker::Unavailable,
            Marker::Panic,
        ]
        .into_iter()
        .find(|m| m.red() == red)
    }
}

/// 8x8 PNG carrying a marker
pub fn marker_png(marker: Marker) -> Vec<u8> {
    let img = RgbImage::from_pixel(8, 8, Rgb([marker.red(), 0, 0]));
    let mut bytes = Cursor::new(Vec::new());
    img.write_to(&mut bytes, ImageFormat::Png).unwrap();
    bytes.into_inner()
}

fn detection(confidence: f32) -> Detection {
    Detection {
        bbox: BoundingBox {
            x: 1.0,
            y: 1.0,
            width: 4.0,
            height: 4.0,
        },
        confidence,
    }
}

/// Detector driven by image markers
#[derive(Default)]
pub struct ScriptedDetector {
    calls: AtomicUsize,
}

impl ScriptedDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FaceDetector for ScriptedDetector {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn detect(&self, image: &[u8]) -> Result<Vec<Detection>, DetectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let decoded = image::load_from_memory(image)
            .map_err(|e| DetectorError::InvalidResponse(e.to_string()))?
            .to_rgb8();
        let marker = Marker::from_red(decoded.get_pixel(0, 0)[0])
            .ok_or_else(|| DetectorError::InvalidResponse("unscripted image".to_string()))?;

        match marker {
            Marker::Face => Ok(vec![detection(0.95)]),
            Marker::FaceAndShadow => Ok(vec![detection(0.91), detection(0.2)]),
            Marker::NoFace => Ok(Vec::new()),
            Marker::Blurry => Ok(vec![detection(0.3), detection(0.1)]),
            Marker::Slow => {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok(vec![detection(0.9)])
            }
            Marker::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Vec::new())
            }
            Marker::Unavailable => Err(DetectorError::ModelUnavailable(
                "model not loaded".to_string(),
            )),
            Marker::Panic => panic!("scripted detector panic"),
        }
    }
}

/// JSON renderer that fails a configurable number of times first
pub struct FlakyRenderer {
    inner: JsonReportRenderer,
    failures_left: AtomicU32,
}

impl FlakyRenderer {
    pub fn new(inner: JsonReportRenderer) -> Self {
        Self {
            inner,
            failures_left: AtomicU32::new(0),
        }
    }

    pub fn fail_next(&self, times: u32) {
        self.failures_left.store(times, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReportRenderer for FlakyRenderer {
    async fn render(&self, report: &ReportBody) -> Result<ArtifactRef, RenderError> {
        let should_fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(RenderError::Backend("renderer offline".to_string()));
        }
        self.inner.render(report).await
    }

    async fn fetch(&self, artifact: &ArtifactRef) -> Result<serde_json::Value, RenderError> {
        self.inner.fetch(artifact).await
    }
}
