//! Forum notification mailer: turns new-topic and new-reply events into
//! batched, scheduled email deliveries with a per-recipient fallback.

pub mod app;
pub mod compose;
pub mod config;
pub mod db;
pub mod directory;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod normalize;
pub mod notifier;
pub mod outbox;
pub mod planner;
pub mod recipients;
pub mod scheduler;
pub mod site;
pub mod transport;
