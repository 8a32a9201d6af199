use crate::config::Config;
use crate::db::{
    lead_metrics_repository::LeadMetricsRepository, usage_repository::UsageRepository,
};
use crate::models::usage::ModelUsageSummary;
use crate::services::n8n::N8nApi;
use crate::utils::cache::TimedCache;
use std::sync::Arc;

/// Usage summaries keyed by the `days` window they cover.
pub type UsageSummaryCache = TimedCache<i64, Vec<ModelUsageSummary>>;

#[derive(Clone)]
pub struct AppState {
    pub usage_repo: Arc<dyn UsageRepository>,
    pub lead_repo: Arc<dyn LeadMetricsRepository>,
    /// `None` when N8N credentials are not configured.
    pub n8n: Option<Arc<dyn N8nApi>>,
    pub config: Arc<Config>,
    pub usage_cache: Arc<UsageSummaryCache>,
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::db::mock_db::{MockLeadMetricsRepository, MockUsageRepository};
    use crate::services::mock_n8n::MockN8n;
    use crate::utils::cache::{tests::ManualClock, Clock};

    pub(crate) struct TestState {
        pub state: AppState,
        pub usage: Arc<MockUsageRepository>,
        pub leads: Arc<MockLeadMetricsRepository>,
        pub n8n: Arc<MockN8n>,
        pub clock: Arc<ManualClock>,
    }

    pub(crate) fn test_state(
        usage: MockUsageRepository,
        leads: MockLeadMetricsRepository,
        n8n: MockN8n,
        config: Config,
    ) -> TestState {
        let usage = Arc::new(usage);
        let leads = Arc::new(leads);
        let n8n = Arc::new(n8n);
        let clock = Arc::new(ManualClock::new());
        let state = AppState {
            usage_repo: usage.clone(),
            lead_repo: leads.clone(),
            n8n: config.n8n.as_ref().map(|_| n8n.clone() as Arc<dyn N8nApi>),
            usage_cache: Arc::new(TimedCache::new(
                config.usage_cache_ttl,
                clock.clone() as Arc<dyn Clock>,
            )),
            config: Arc::new(config),
        };
        TestState {
            state,
            usage,
            leads,
            n8n,
            clock,
        }
    }

    pub(crate) fn default_test_state() -> TestState {
        test_state(
            MockUsageRepository::default(),
            MockLeadMetricsRepository::default(),
            MockN8n::default(),
            Config::for_tests(),
        )
    }
}
