//! Application assembly: builds every component over one shared store and
//! runs the background tasks.

use crate::admin::{AdminApi, AdminServer, AdminState};
use crate::analytics::{
    AnalyticsBroadcaster, AnalyticsService, DecisionCounters, StatsAggregator, TrafficLogWriter,
};
use crate::antibot::AntiBotValidator;
use crate::config::GatewayConfig;
use crate::gateway::{GatewayResult, GatewayServer, GatewayState, UpstreamProxy};
use crate::limiter::{QueueAccountant, RateLimiterService, RuleCache};
use crate::settings::SettingsService;
use crate::store::{MemoryStore, StateStore};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Aggregator flush cadence.
const AGGREGATOR_TICK: Duration = Duration::from_secs(5);
/// Push-channel publish cadence.
const PUBLISH_TICK: Duration = Duration::from_secs(2);
/// Queue sweeper and cache purge cadence.
const SWEEP_TICK: Duration = Duration::from_secs(60);

/// The assembled gateway: both servers plus the periodic tasks.
pub struct App {
    store: Arc<MemoryStore>,
    antibot: Arc<AntiBotValidator>,
    queues: Arc<QueueAccountant>,
    aggregator: Arc<StatsAggregator>,
    analytics: Arc<AnalyticsService>,
    broadcaster: Arc<AnalyticsBroadcaster>,
    settings: Arc<SettingsService>,
    rules: Arc<RuleCache>,
    gateway: GatewayServer,
    admin: AdminServer,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("gateway", &self.gateway)
            .field("admin", &self.admin)
            .finish()
    }
}

impl App {
    /// Wire every component together from the bootstrap configuration.
    #[must_use]
    pub fn bootstrap(config: &GatewayConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let shared: Arc<dyn StateStore> = store.clone();

        let settings = Arc::new(SettingsService::new(shared.clone()));
        let rules = Arc::new(RuleCache::new(shared.clone()));
        let queues = Arc::new(QueueAccountant::new());
        let limiter = Arc::new(RateLimiterService::new(
            shared.clone(),
            rules.clone(),
            queues.clone(),
        ));
        let antibot = Arc::new(AntiBotValidator::new(settings.clone()));
        let counters = Arc::new(DecisionCounters::new());
        let traffic_log = Arc::new(TrafficLogWriter::new(shared.clone(), settings.clone()));
        let aggregator = Arc::new(StatsAggregator::new(
            shared.clone(),
            settings.clone(),
            counters.clone(),
        ));
        let analytics = Arc::new(AnalyticsService::new(shared.clone(), rules.clone()));
        let broadcaster = Arc::new(AnalyticsBroadcaster::new());

        let gateway_state = Arc::new(GatewayState {
            settings: settings.clone(),
            limiter,
            antibot: antibot.clone(),
            traffic_log: traffic_log.clone(),
            counters,
            proxy: UpstreamProxy::new(Duration::from_millis(config.proxy.response_timeout_ms)),
            default_upstream: config.proxy.default_upstream.clone(),
            max_body_bytes: config.gateway.max_body_bytes,
        });
        let gateway = GatewayServer::new(config.gateway.socket_addr(), gateway_state);

        let admin_state = Arc::new(AdminState {
            api: AdminApi::new(shared, rules.clone(), settings.clone()),
            analytics: analytics.clone(),
            traffic_log,
            broadcaster: broadcaster.clone(),
        });
        let admin = AdminServer::new(config.admin.socket_addr(), admin_state);

        Self {
            store,
            antibot,
            queues,
            aggregator,
            analytics,
            broadcaster,
            settings,
            rules,
            gateway,
            admin,
            tasks: Vec::new(),
        }
    }

    /// Seed defaults, load rules, start both servers and the periodic
    /// tasks. Returns the bound (gateway, admin) addresses.
    pub async fn start(&mut self) -> GatewayResult<(SocketAddr, SocketAddr)> {
        if let Err(err) = self.settings.seed_defaults().await {
            warn!(error = %err, "failed to seed default settings");
        }
        if let Err(err) = self.rules.refresh().await {
            warn!(error = %err, "failed to load rules at startup");
        }

        let gateway_addr = self.gateway.start().await?;
        let admin_addr = self.admin.start().await?;

        self.tasks.push(spawn_interval(AGGREGATOR_TICK, {
            let aggregator = self.aggregator.clone();
            move || {
                let aggregator = aggregator.clone();
                async move { aggregator.flush().await }
            }
        }));

        self.tasks.push(spawn_interval(PUBLISH_TICK, {
            let analytics = self.analytics.clone();
            let broadcaster = self.broadcaster.clone();
            move || {
                let analytics = analytics.clone();
                let broadcaster = broadcaster.clone();
                async move {
                    if broadcaster.subscriber_count() == 0 {
                        return;
                    }
                    match analytics.summary().await {
                        Ok(summary) => {
                            if let Some(text) = crate::analytics::envelope("summary", &summary) {
                                broadcaster.broadcast(&text);
                            }
                        },
                        Err(err) => warn!(error = %err, "failed to compute summary for publish"),
                    }
                }
            }
        }));

        self.tasks.push(spawn_interval(SWEEP_TICK, {
            let queues = self.queues.clone();
            let antibot = self.antibot.clone();
            let store = self.store.clone();
            move || {
                let queues = queues.clone();
                let antibot = antibot.clone();
                let store = store.clone();
                async move {
                    queues.sweep();
                    antibot.purge_expired();
                    store.purge_expired();
                }
            }
        }));

        info!(%gateway_addr, %admin_addr, "tollgate started");
        Ok((gateway_addr, admin_addr))
    }

    /// Stop both servers and the periodic tasks.
    pub async fn shutdown(&mut self) {
        if let Err(err) = self.gateway.stop().await {
            warn!(error = %err, "gateway did not stop cleanly");
        }
        if let Err(err) = self.admin.stop().await {
            warn!(error = %err, "admin server did not stop cleanly");
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        info!("tollgate stopped");
    }
}

/// Run `tick` every `period` until the returned handle is aborted.
fn spawn_interval<F, Fut>(period: Duration, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            tick().await;
        }
    })
}
