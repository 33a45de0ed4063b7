//! Pipeline test harness on a temporary root folder

use proctor_common::config::RootFolderInitializer;
use proctor_common::events::EventBus;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use proctor_vs::collab::{FsImageStore, JsonReportRenderer};
use proctor_vs::db::{init_database_pool, SessionJournal};
use proctor_vs::pipeline::{AlertSubmission, Pipeline, PipelineParts, PipelineSettings};

use super::scripted::{marker_png, FlakyRenderer, Marker, ScriptedDetector};

pub struct TestHarness {
    pub pipeline: Arc<Pipeline>,
    pub detector: Arc<ScriptedDetector>,
    pub renderer: Arc<FlakyRenderer>,
    pub journal: SessionJournal,
    pub events: EventBus,
    pub root: RootFolderInitializer,
    // Keeps the root folder alive
    _temp_dir: Arc<TempDir>,
}

impl TestHarness {
    pub async fn start(settings: PipelineSettings) -> Self {
        let temp_dir = Arc::new(TempDir::new().unwrap());
        Self::start_in(temp_dir, settings).await
    }

    /// Start on an existing root folder (restart simulation)
    pub async fn start_in(temp_dir: Arc<TempDir>, settings: PipelineSettings) -> Self {
        let root = RootFolderInitializer::new(temp_dir.path().to_path_buf());
        let pool = init_database_pool(&root.database_path()).await.unwrap();
        let journal = SessionJournal::new(pool);

        let detector = Arc::new(ScriptedDetector::new());
        let store = FsImageStore::open(&root.images_dir()).await.unwrap();
        let renderer = Arc::new(FlakyRenderer::new(
            JsonReportRenderer::open(&root.reports_dir()).await.unwrap(),
        ));
        let events = EventBus::new(1024);

        let pipeline = Pipeline::start(
            PipelineParts {
                detector: detector.clone(),
                store: Arc::new(store),
                renderer: renderer.clone(),
                journal: journal.clone(),
                events: events.clone(),
            },
            settings,
        )
        .await
        .unwrap();

        Self {
            pipeline: Arc::new(pipeline),
            detector,
            renderer,
            journal,
            events,
            root,
            _temp_dir: temp_dir,
        }
    }

    pub fn temp_dir(&self) -> Arc<TempDir> {
        self._temp_dir.clone()
    }

    pub async fn submit(&self, marker: Marker) -> proctor_vs::models::Alert {
        self.pipeline.submit(alert(marker)).await.unwrap()
    }
}

/// Alert submission carrying a scripted image
pub fn alert(marker: Marker) -> AlertSubmission {
    AlertSubmission {
        alert_type: "multiple_faces".to_string(),
        image: marker_png(marker),
        metadata: json!({ "device_id": "edge-01" }),
    }
}

/// Wait until no verification of the active or sealed sessions is pending
pub async fn wait_for_idle(pipeline: &Pipeline) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let active_pending = pipeline.snapshot().await.counters.pending_verifications;
        let sealed_pending: u64 = pipeline
            .sealed_sessions()
            .await
            .iter()
            .map(|s| s.counters.pending_verifications)
            .sum();

        if active_pending == 0 && sealed_pending == 0 && pipeline.in_flight() == 0 {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "pipeline did not become idle"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
