use std::{sync::Arc, time::Duration};

use tokio::sync::{
    mpsc::{self, error::TrySendError},
    watch,
};
use tracing::{debug, info, trace, warn};

use crate::{
    activity::{ListType, RecentActivity},
    classifier::{classify_or_unknown, HostClassifier},
    config::ActivityConfig,
    counters::Outcome,
};

/// Hot-path handle that queues hosts for classification.
#[derive(Debug, Clone)]
pub struct ActivityLogger {
    host_tx: mpsc::Sender<(String, Outcome)>,
}

impl ActivityLogger {
    /// Queue a host with its recorded outcome without waiting.
    /// Returns `false` when the host was dropped.
    pub fn log(&self, host: impl Into<String>, outcome: Outcome) -> bool {
        match self.host_tx.try_send((host.into(), outcome)) {
            Ok(()) => true,
            Err(TrySendError::Full((host, _))) => {
                trace!("Activity queue full, dropping {}", host);
                false
            }
            Err(TrySendError::Closed((host, _))) => {
                trace!("Activity queue closed, dropping {}", host);
                false
            }
        }
    }
}

/// Labels queued hosts and appends them to the recent activity buffer, off
/// the request path.
///
/// With a classifier the label is the host's list membership. Without one
/// the outcome the filter recorded is used as is.
pub struct Enricher {
    host_rx: mpsc::Receiver<(String, Outcome)>,
    classifier: Option<Arc<dyn HostClassifier>>,
    activity: Arc<RecentActivity>,
    drain_timeout: Duration,
}

impl Enricher {
    pub fn new(
        classifier: Option<Arc<dyn HostClassifier>>,
        activity: Arc<RecentActivity>,
        config: &ActivityConfig,
    ) -> (Self, ActivityLogger) {
        let (host_tx, host_rx) = mpsc::channel(config.queue_capacity.max(1));

        let enricher = Self {
            host_rx,
            classifier,
            activity,
            drain_timeout: config.drain_timeout,
        };

        (enricher, ActivityLogger { host_tx })
    }

    pub async fn run(&mut self, mut shutdown_rx: watch::Receiver<bool>) {
        if *shutdown_rx.borrow_and_update() {
            self.drain().await;
            return;
        }

        loop {
            tokio::select! {
                shutdown = shutdown_rx.changed() => {
                    match shutdown {
                        Ok(_) => {
                            info!("Activity enricher shutting down");
                            self.drain().await;
                            break;
                        }
                        Err(e) => {
                            warn!("Shutdown channel closed: {}", e);
                            break;
                        }
                    }
                }

                event = self.host_rx.recv() => {
                    match event {
                        Some((host, outcome)) => self.handle_host(host, outcome).await,
                        None => {
                            debug!("All activity loggers dropped");
                            break;
                        }
                    }
                }
            }
        }

        info!("Activity enricher shutdown complete");
    }

    async fn drain(&mut self) {
        let drain_timeout = self.drain_timeout;
        let drain = async {
            let mut drained = 0usize;
            while let Ok((host, outcome)) = self.host_rx.try_recv() {
                self.handle_host(host, outcome).await;
                drained += 1;
            }
            drained
        };

        match tokio::time::timeout(drain_timeout, drain).await {
            Ok(drained) => debug!("Drained {} queued hosts", drained),
            Err(_) => warn!("Gave up draining activity queue after {:?}", drain_timeout),
        }
    }

    async fn handle_host(&self, host: String, outcome: Outcome) {
        let list_type = match &self.classifier {
            Some(classifier) => classify(Arc::clone(classifier), &host).await,
            None => ListType::from(outcome),
        };

        trace!("{} ({}) labeled {:?}", host, outcome, list_type);
        self.activity.append(host, list_type);
    }
}

/// Look the host up on the blocking pool, since list lookups may hit disk.
async fn classify(classifier: Arc<dyn HostClassifier>, host: &str) -> ListType {
    let lookup = host.to_string();

    match tokio::task::spawn_blocking(move || classify_or_unknown(classifier.as_ref(), &lookup))
        .await
    {
        Ok(list_type) => list_type,
        Err(e) => {
            warn!("Classification task for {} failed: {}", host, e);
            ListType::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{activity::LogFilter, classifier::HostListClassifier, errors::ClassifyError};
    use crate::counters::Outcome::{Allowed, Blocked, Redirected};
    use tokio::time::sleep;

    struct Failing;

    impl HostClassifier for Failing {
        fn classify(&self, _host: &str) -> Result<ListType, ClassifyError> {
            Err(ClassifyError::unavailable("offline"))
        }
    }

    fn hosts(activity: &RecentActivity, filter: LogFilter) -> Vec<String> {
        activity
            .query(filter, 50)
            .iter()
            .map(|e| e.host().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_hosts_are_classified_in_order() {
        let classifier = HostListClassifier::new()
            .with_host("a.com", ListType::Blocked)
            .with_host("b.com", ListType::Allowed)
            .with_host("c.com", ListType::Blocked);
        let activity = Arc::new(RecentActivity::default());
        let (mut enricher, logger) = Enricher::new(
            Some(Arc::new(classifier)),
            Arc::clone(&activity),
            &ActivityConfig::default(),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            enricher.run(shutdown_rx).await;
        });

        assert!(logger.log("a.com", Blocked));
        assert!(logger.log("b.com", Allowed));
        assert!(logger.log("c.com", Blocked));
        // the lists win over the recorded outcome
        assert!(logger.log("d.com", Blocked));

        sleep(Duration::from_millis(100)).await;

        assert_eq!(
            hosts(&activity, LogFilter::All),
            ["d.com", "c.com", "b.com", "a.com"]
        );
        assert_eq!(hosts(&activity, LogFilter::BlockedOnly), ["c.com", "a.com"]);
        assert_eq!(hosts(&activity, LogFilter::AllowedOnly), ["d.com", "b.com"]);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_lookup_is_unknown() {
        let activity = Arc::new(RecentActivity::default());
        let (mut enricher, logger) = Enricher::new(
            Some(Arc::new(Failing)),
            Arc::clone(&activity),
            &ActivityConfig::default(),
        );

        logger.log("x.com", Blocked);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        shutdown_tx.send(true).unwrap();
        enricher.run(shutdown_rx).await;

        let entries = activity.query(LogFilter::AllowedOnly, 5);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].list_type(), ListType::Unknown);
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        let activity = Arc::new(RecentActivity::default());
        let config = ActivityConfig {
            queue_capacity: 2,
            ..Default::default()
        };
        let (mut enricher, logger) =
            Enricher::new(Some(Arc::new(HostListClassifier::new())), activity.clone(), &config);

        assert!(logger.log("1.com", Allowed));
        assert!(logger.log("2.com", Allowed));
        assert!(!logger.log("3.com", Allowed));

        // shutdown drains what was queued
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        shutdown_tx.send(true).unwrap();
        enricher.run(shutdown_rx).await;

        assert_eq!(hosts(&activity, LogFilter::All), ["2.com", "1.com"]);
    }

    #[tokio::test]
    async fn test_recorded_outcome_labels_without_classifier() {
        let activity = Arc::new(RecentActivity::default());
        let (mut enricher, logger) =
            Enricher::new(None, Arc::clone(&activity), &ActivityConfig::default());

        logger.log("ads.example.com", Blocked);
        logger.log("cdn.example.com", Redirected);
        logger.log("example.com", Allowed);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        shutdown_tx.send(true).unwrap();
        enricher.run(shutdown_rx).await;

        assert_eq!(
            hosts(&activity, LogFilter::BlockedOnly),
            ["ads.example.com"]
        );
        assert_eq!(hosts(&activity, LogFilter::AllowedOnly), ["example.com"]);
        assert_eq!(
            activity.query(LogFilter::All, 5)[1].list_type(),
            ListType::Redirected
        );
    }
}
