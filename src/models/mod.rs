pub(crate) mod de;
pub mod execution;
pub mod lead;
pub mod sync;
pub mod usage;
pub mod workflow;
