//! Render scheduling, dirty-region intake and the assembled tile service.
#![forbid(unsafe_code)]

mod config;
mod error;
mod event;
mod pipeline;
mod queue;
mod scheduler;
mod service;
mod watcher;

pub use config::{TesseraConfig, WatchConfig, WorldConfig};
pub use error::{ConfigError, RenderError, RuntimeError};
pub use event::{ChangeSink, DirtyReason, DirtyRegionEvent};
pub use pipeline::TilePipeline;
pub use queue::{EnqueueOutcome, RenderQueue};
pub use scheduler::{
    RegionStatus, RenderJob, RenderOutcome, RenderScheduler, RetryPolicy, SchedulerConfig,
    SchedulerStats,
};
pub use service::{ReconcileReport, RenderService, ServiceStats};
pub use watcher::{ChangeHandle, ChangeWatcher, Debouncer, HeaderDiff, RegionFileWatcher};
