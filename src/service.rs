use std::{future::Future, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{
    sync::{
        broadcast::{self, error::RecvError},
        watch,
    },
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    activity::{LogEntry, LogFilter, RecentActivity},
    classifier::{HostClassifier, HostListClassifier},
    config::Config,
    counters::{CounterSet, Outcome},
    display::{format_count, format_percentage},
    enricher::{ActivityLogger, Enricher},
    http_api::{self, ApiState},
    statistics::Statistics,
    TelemetryError,
};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns the statistics unit, the recent activity buffer and their
/// background tasks for the lifetime of the filtering service.
pub struct TelemetryService {
    config: Config,
    statistics: Arc<Statistics>,
    activity: Arc<RecentActivity>,
    logger: ActivityLogger,
    enricher: Mutex<Option<Enricher>>,
    shutdown: broadcast::Sender<()>,
    main_shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TelemetryService {
    pub fn new(config: Config) -> Result<Self, TelemetryError> {
        Config::validate(&config)?;

        let classifier: Option<Arc<dyn HostClassifier>> = if config.classifier.is_empty() {
            info!("No host lists configured, activity is labeled by recorded outcome");
            None
        } else {
            Some(Arc::new(HostListClassifier::from_config(&config.classifier)?))
        };
        let statistics = Arc::new(Statistics::from_config(&config.stats));

        Ok(Self::with_parts(config, statistics, classifier))
    }

    /// Assemble a service from an existing statistics unit and an optional
    /// classifier. Without one, recent activity uses the recorded outcome.
    pub fn with_parts(
        config: Config,
        statistics: Arc<Statistics>,
        classifier: Option<Arc<dyn HostClassifier>>,
    ) -> Self {
        let activity = Arc::new(RecentActivity::new(config.activity.capacity));
        let (enricher, logger) = Enricher::new(classifier, Arc::clone(&activity), &config.activity);
        let (main_shutdown, _) = watch::channel(false);

        Self {
            config,
            statistics,
            activity,
            logger,
            enricher: Mutex::new(Some(enricher)),
            shutdown: broadcast::channel(1).0,
            main_shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn statistics(&self) -> &Arc<Statistics> {
        &self.statistics
    }

    pub fn activity(&self) -> &Arc<RecentActivity> {
        &self.activity
    }

    /// Handle for callers that only feed recent activity.
    pub fn activity_logger(&self) -> ActivityLogger {
        self.logger.clone()
    }

    /// Count a classified request and queue its host for recent activity.
    ///
    /// Never waits on observers or on host classification.
    pub fn record(&self, host: &str, outcome: Outcome) -> (u64, u64) {
        let counts = self.statistics.record(outcome);
        self.logger.log(host, outcome);
        counts
    }

    pub fn query_activity(&self, filter: LogFilter, limit: usize) -> Vec<LogEntry> {
        self.activity.query(filter, limit)
    }

    /// Reset counters and clear recent activity.
    pub fn reset_all(&self) -> CounterSet {
        let zeroed = self.statistics.reset();
        self.activity.clear();
        zeroed
    }

    fn spawn_task<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let task = tokio::spawn(future);
        debug!("Spawned {} task: {:?}", name, task.id());
        self.tasks.lock().push(task);
    }

    /// Start background tasks and wait until `shutdown` is called.
    pub async fn run(self: Arc<Self>) -> Result<(), TelemetryError> {
        let enricher = self.enricher.lock().take();
        match enricher {
            Some(mut enricher) => {
                let shutdown_rx = self.main_shutdown.subscribe();
                self.spawn_task("enricher", async move {
                    enricher.run(shutdown_rx).await;
                });
            }
            None => warn!("Activity enricher already running"),
        }

        // Log-only stand-in for a user-facing notification. External
        // refreshers subscribe through `Statistics::subscribe_updates`.
        let mut updates = self.statistics.subscribe_updates();
        let statistics = Arc::clone(&self.statistics);
        let mut shutdown_rx = self.shutdown.subscribe();
        self.spawn_task("blocked count log", async move {
            loop {
                tokio::select! {
                    update = updates.recv() => {
                        match update {
                            Ok(_) | Err(RecvError::Lagged(_)) => {
                                let snapshot = statistics.snapshot();
                                debug!(
                                    "Blocked requests: {} ({})",
                                    format_count(snapshot.blocked),
                                    format_percentage(snapshot.block_percentage())
                                );
                            }
                            Err(RecvError::Closed) => break,
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Blocked count log received shutdown signal");
                        break;
                    }
                }
            }
        });

        if self.config.http.enabled {
            let state = ApiState {
                statistics: Arc::clone(&self.statistics),
                activity: Arc::clone(&self.activity),
                display_limit: self.config.activity.display_limit,
            };
            let address = self.config.http.bind_addr.clone();
            let port = self.config.http.bind_port;
            let shutdown_rx = self.shutdown.subscribe();

            self.spawn_task("http", async move {
                if let Err(e) = http_api::start_http_server(address, port, state, shutdown_rx).await
                {
                    error!("HTTP server error: {}", e);
                }
            });
        }

        let mut main_shutdown = self.main_shutdown.subscribe();
        info!("Telemetry service running");

        loop {
            if *main_shutdown.borrow_and_update() {
                break;
            }
            if main_shutdown.changed().await.is_err() {
                break;
            }
        }

        info!("Telemetry service stopped");
        Ok(())
    }

    /// Graceful shutdown
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown");

        let snapshot = self.statistics.snapshot();
        info!(
            "Final statistics: {} total, {} blocked ({})",
            format_count(snapshot.total),
            format_count(snapshot.blocked),
            format_percentage(snapshot.block_percentage())
        );

        self.main_shutdown.send_replace(true);
        // No subscribers when no tasks were started
        let _ = self.shutdown.send(());

        let tasks = {
            let mut tasks = self.tasks.lock();
            tasks.drain(..).collect::<Vec<_>>()
        };

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, futures::future::join_all(tasks)).await {
            Ok(results) => {
                let failed = results.iter().filter(|r| r.is_err()).count();
                if failed > 0 {
                    error!("{} tasks failed during shutdown", failed);
                } else {
                    info!("All tasks completed successfully");
                }
            }
            Err(_) => {
                error!(
                    "Timeout waiting for tasks to complete after {:?}",
                    SHUTDOWN_TIMEOUT
                );
            }
        }

        info!("Shutdown complete");
    }
}
