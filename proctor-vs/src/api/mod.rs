//! HTTP API handlers for proctor-vs

pub mod alerts;
pub mod health;
pub mod heartbeat;
pub mod reports;
pub mod session;
pub mod sse;

pub use alerts::alert_routes;
pub use health::health_routes;
pub use heartbeat::heartbeat_routes;
pub use reports::report_routes;
pub use session::session_routes;
pub use sse::event_stream;
