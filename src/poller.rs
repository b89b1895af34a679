use crate::climkit_api::ClimkitAPI;
use crate::errors::{ClimkitError, ClimkitResult};
use crate::home_assistant::StateStore;
use crate::meter::{Meter, SensorState, Site};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

/// A site and the meters found on it at setup
#[derive(Debug, Clone)]
pub struct DiscoveredSite {
    pub site: Site,
    pub meters: Vec<Meter>,
}

/// What one polling pass did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub published: usize,
    pub unavailable: usize,
    pub publish_failures: usize,
}

/// Polls every discovered meter and republishes its reading.
///
/// Only obtainable through [`Poller::setup`], so holding one means the client
/// is authenticated and at least one meter exists.
pub struct Poller {
    api: ClimkitAPI,
    store: Arc<dyn StateStore>,
    sites: Vec<DiscoveredSite>,
}

impl Poller {
    /// Authenticates, then discovers sites and their meters once
    pub async fn setup(mut api: ClimkitAPI, store: Arc<dyn StateStore>) -> ClimkitResult<Self> {
        if let Err(e) = api.authenticate().await {
            api.close();
            return Err(e);
        }

        let sites = api.get_sites().await;
        if sites.is_empty() {
            error!("No sites found.");
            api.close();
            return Err(ClimkitError::NoSites);
        }

        let mut discovered = Vec::with_capacity(sites.len());
        for site in sites {
            let meters = api.get_meter_list(&site.site_id).await;
            if meters.is_empty() {
                warn!("Site {} has no meters", site.site_id);
            }
            info!("Site {}: {} meter(s)", site.site_id, meters.len());
            discovered.push(DiscoveredSite { site, meters });
        }

        if discovered.iter().all(|site| site.meters.is_empty()) {
            error!("No meters found.");
            api.close();
            return Err(ClimkitError::NoMeters {
                sites: discovered.len(),
            });
        }

        Ok(Self {
            api,
            store,
            sites: discovered,
        })
    }

    pub fn sites(&self) -> &[DiscoveredSite] {
        &self.sites
    }

    pub fn meter_count(&self) -> usize {
        self.sites.iter().map(|site| site.meters.len()).sum()
    }

    /// Fetches and publishes every meter once. A failed fetch publishes 0 marked unavailable.
    pub async fn update_sensors(&self) -> TickSummary {
        let mut summary = TickSummary::default();

        for DiscoveredSite { site, meters } in &self.sites {
            for meter in meters {
                let reading = self
                    .api
                    .get_meter_data(&site.site_id, &meter.id)
                    .await
                    .reading();
                if !reading.available {
                    summary.unavailable += 1;
                }

                let state = SensorState::new(&site.site_id, meter, reading);
                match self.store.publish(&state).await {
                    Ok(()) => summary.published += 1,
                    Err(e) => {
                        summary.publish_failures += 1;
                        warn!("Failed to publish {}: {}", state.entity_id, e);
                    }
                }
            }
        }

        info!(
            "Published {} sensor(s), {} unavailable, {} failed",
            summary.published, summary.unavailable, summary.publish_failures
        );
        summary
    }

    pub fn close(mut self) {
        self.api.close();
    }

    /// Runs `update_sensors` now and then every `period` until the handle is stopped.
    /// Passes run one after another inside a single task and never overlap.
    pub fn spawn(self, period: Duration) -> PollerHandle {
        let (shutdown, mut shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            info!(
                "Polling {} meter(s) every {:?}",
                self.meter_count(),
                period
            );
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        self.update_sensors().await;
                    }
                }
            }

            self.close();
            info!("Poller stopped");
        });

        PollerHandle { shutdown, task }
    }
}

/// Owned handle to a running poll task. Dropping it stops polling as well.
pub struct PollerHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Lets the current pass finish, then closes the API session
    pub async fn stop(self) {
        // The task may already be gone, in which case there is nobody to tell
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            error!("Poller task ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        states: Mutex<HashMap<String, SensorState>>,
        publishes: Mutex<usize>,
        reject: Option<String>,
    }

    impl MemoryStore {
        fn get(&self, entity_id: &str) -> Option<SensorState> {
            self.states.lock().unwrap().get(entity_id).cloned()
        }

        fn len(&self) -> usize {
            self.states.lock().unwrap().len()
        }

        fn publishes(&self) -> usize {
            *self.publishes.lock().unwrap()
        }
    }

    #[async_trait]
    impl StateStore for MemoryStore {
        async fn publish(&self, state: &SensorState) -> Result<(), anyhow::Error> {
            *self.publishes.lock().unwrap() += 1;
            if self.reject.as_deref() == Some(state.entity_id.as_str()) {
                anyhow::bail!("rejected");
            }
            self.states
                .lock()
                .unwrap()
                .insert(state.entity_id.clone(), state.clone());
            Ok(())
        }
    }

    async fn climkit_server() -> (mockito::ServerGuard, Vec<mockito::Mock>) {
        let mut server = mockito::Server::new_async().await;
        let mocks = vec![
            server
                .mock("POST", "/auth")
                .with_status(200)
                .with_body(r#"{"token": "t"}"#)
                .create_async()
                .await,
            server
                .mock("GET", "/all_installations")
                .with_status(200)
                .with_body(r#"[{"site_id": "s1"}, {"site_id": "s2"}]"#)
                .create_async()
                .await,
            server
                .mock("GET", "/meter_info/s1")
                .with_status(200)
                .with_body(
                    r#"[
                        {"id": "42", "type": "electricity", "mode": "import", "site_address": "Main Hall"},
                        {"id": "43", "type": "hot_water", "mode": "total", "site_address": "Main Hall", "is_rule_meter": true}
                    ]"#,
                )
                .create_async()
                .await,
            server
                .mock("GET", "/meter_info/s2")
                .with_status(200)
                .with_body(r#"[{"id": "7", "type": "gas", "name": "Annex"}]"#)
                .create_async()
                .await,
            server
                .mock("GET", "/meter_data/s1/42")
                .with_status(200)
                .with_body(r#"{"value": 1500.25}"#)
                .create_async()
                .await,
            server
                .mock("GET", "/meter_data/s1/43")
                .with_status(500)
                .create_async()
                .await,
            server
                .mock("GET", "/meter_data/s2/7")
                .with_status(200)
                .with_body(r#"{"value": 3}"#)
                .create_async()
                .await,
        ];
        (server, mocks)
    }

    #[tokio::test]
    async fn test_setup_discovers_sites_and_meters() {
        let (server, _mocks) = climkit_server().await;
        let store = Arc::new(MemoryStore::default());

        let poller = Poller::setup(ClimkitAPI::new(server.url(), "u", "p"), store.clone())
            .await
            .unwrap();

        assert_eq!(poller.sites().len(), 2);
        assert_eq!(poller.meter_count(), 3);
        // Nothing is published before the first tick
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_setup_auth_failure() {
        let mut server = mockito::Server::new_async().await;
        let _auth = server
            .mock("POST", "/auth")
            .with_status(401)
            .create_async()
            .await;
        let sites = server
            .mock("GET", "/all_installations")
            .expect(0)
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::default());
        let result = Poller::setup(ClimkitAPI::new(server.url(), "u", "p"), store.clone()).await;

        assert!(matches!(
            result,
            Err(ClimkitError::Authentication { status: 401 })
        ));
        assert_eq!(store.publishes(), 0);
        sites.assert_async().await;
    }

    #[tokio::test]
    async fn test_setup_without_sites() {
        let mut server = mockito::Server::new_async().await;
        let _auth = server
            .mock("POST", "/auth")
            .with_status(200)
            .with_body(r#"{"token": "t"}"#)
            .create_async()
            .await;
        let _sites = server
            .mock("GET", "/all_installations")
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::default());
        let result = Poller::setup(ClimkitAPI::new(server.url(), "u", "p"), store.clone()).await;

        assert!(matches!(result, Err(ClimkitError::NoSites)));
        assert_eq!(store.publishes(), 0);
    }

    #[tokio::test]
    async fn test_setup_without_meters() {
        let mut server = mockito::Server::new_async().await;
        let _auth = server
            .mock("POST", "/auth")
            .with_status(200)
            .with_body(r#"{"token": "t"}"#)
            .create_async()
            .await;
        let _sites = server
            .mock("GET", "/all_installations")
            .with_status(200)
            .with_body(r#"[{"site_id": "s1"}]"#)
            .create_async()
            .await;
        let _meters = server
            .mock("GET", "/meter_info/s1")
            .with_status(503)
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::default());
        let result = Poller::setup(ClimkitAPI::new(server.url(), "u", "p"), store).await;

        assert!(matches!(result, Err(ClimkitError::NoMeters { sites: 1 })));
    }

    #[tokio::test]
    async fn test_update_sensors_publishes_every_meter() {
        let (server, _mocks) = climkit_server().await;
        let store = Arc::new(MemoryStore::default());
        let poller = Poller::setup(ClimkitAPI::new(server.url(), "u", "p"), store.clone())
            .await
            .unwrap();

        let summary = poller.update_sensors().await;

        assert_eq!(
            summary,
            TickSummary {
                published: 3,
                unavailable: 1,
                publish_failures: 0
            }
        );

        let electricity = store.get("sensor.main_hall_electricity_import_42").unwrap();
        assert_eq!(electricity.state, "1500.25");
        assert_eq!(electricity.attributes["device_class"], "energy");
        assert_eq!(electricity.attributes["unit_of_measurement"], "kWh");
        assert_eq!(electricity.attributes["available"], true);

        // The failed fetch still publishes, as zero and unavailable
        let water = store.get("sensor.main_hall_hot_water_total_43").unwrap();
        assert_eq!(water.state, "0");
        assert_eq!(water.attributes["available"], false);
        assert_eq!(water.attributes["device_class"], "water");
        assert_eq!(water.attributes["is_rule_meter"], true);

        let gas = store.get("sensor.annex_gas_unknown_7").unwrap();
        assert_eq!(gas.state, "3");
        assert!(gas.attributes.get("device_class").is_none());
        assert_eq!(gas.attributes["site_id"], "s2");
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_abort_tick() {
        let (server, _mocks) = climkit_server().await;
        let store = Arc::new(MemoryStore {
            reject: Some("sensor.main_hall_electricity_import_42".to_string()),
            ..Default::default()
        });
        let poller = Poller::setup(ClimkitAPI::new(server.url(), "u", "p"), store.clone())
            .await
            .unwrap();

        let summary = poller.update_sensors().await;

        assert_eq!(summary.published, 2);
        assert_eq!(summary.publish_failures, 1);
        assert!(store.get("sensor.annex_gas_unknown_7").is_some());
    }

    #[tokio::test]
    async fn test_spawn_runs_immediately_and_stops() {
        let (server, _mocks) = climkit_server().await;
        let store = Arc::new(MemoryStore::default());
        let poller = Poller::setup(ClimkitAPI::new(server.url(), "u", "p"), store.clone())
            .await
            .unwrap();

        let handle = poller.spawn(Duration::from_secs(3600));

        tokio::time::timeout(Duration::from_secs(5), async {
            while store.len() < 3 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("first pass did not run");

        assert!(!handle.is_finished());
        handle.stop().await;

        // Long interval, so exactly one pass ran
        assert_eq!(store.publishes(), 3);
    }
}
