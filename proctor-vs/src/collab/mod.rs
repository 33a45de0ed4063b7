//! Boundary collaborators of the verification pipeline
//!
//! Each collaborator is a trait so the pipeline can run against the shipped
//! adapters in production and scripted doubles in tests.

pub mod detector;
pub mod renderer;
pub mod storage;

pub use detector::{DetectorError, FaceDetector, RemoteDetector};
pub use renderer::{ArtifactRef, JsonReportRenderer, RenderError, ReportRenderer};
pub use storage::{FsImageStore, ImageRef, ImageStore, StorageError, StoredRef};

/// Reject names that could escape a storage directory
pub(crate) fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.contains('\0')
}
