pub mod lead_metrics_repository;
pub mod mock_db;
pub mod postgres_lead_metrics_repository;
pub mod postgres_usage_repository;
pub mod usage_repository;
