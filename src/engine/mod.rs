//! The extraction pipeline. Everything in here is free of I/O except the
//! two orchestrators, which reach N8N and the store through traits.

pub mod formatter;
pub mod lead_extractor;
pub mod lead_metrics;
pub mod lead_sync;
pub mod pricing;
pub mod sync;
pub mod usage_extractor;

pub use formatter::format_usage_row;
pub use pricing::{calculate_cost, normalize_model};
pub use sync::{SyncError, SyncOptions, UsageSync};
pub use usage_extractor::{extract_usage, ExtractionError};
