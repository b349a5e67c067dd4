//! The scan loop.
//!
//! One cycle at a time: reload settings and the registry, scan, process, persist
//! `detect` changes. The next scan starts `update_interval` after the previous
//! cycle completed. Pairing commands write the registry from another process;
//! the reload picks their changes up before the next scan.

use std::future::Future;

use beacon_core::{
    AdvertisementSource, CycleReport, EventSink, ProfileStore, Reading, ScanService,
};
use tracing::{debug, info, warn};

use crate::state::DaemonState;

/// Periodic scanner for the paired devices in the registry.
pub struct Daemon {
    state: DaemonState,
    service: ScanService,
    source: Box<dyn AdvertisementSource>,
    sink: Box<dyn EventSink>,
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("state", &self.state)
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

impl Daemon {
    /// Create a daemon tracking every device in the registry.
    #[must_use]
    pub fn new(
        state: DaemonState,
        source: Box<dyn AdvertisementSource>,
        sink: Box<dyn EventSink>,
    ) -> Self {
        let mut service = ScanService::new(&state.config().scan);
        service.sync_paired(&state.registry().known_devices());
        info!(devices = service.tracker().len(), "Tracking paired devices");

        Self {
            state,
            service,
            source,
            sink,
        }
    }

    /// Daemon state.
    #[must_use]
    pub const fn state(&self) -> &DaemonState {
        &self.state
    }

    /// Run one cycle with a fresh settings snapshot.
    pub async fn cycle(&mut self) -> CycleReport {
        let config = self.state.reload_config().clone();
        self.service.apply_config(&config.scan);

        let devices = self.state.reload_registry().known_devices();
        let tracked = self.service.tracker().len();
        self.service.sync_paired(&devices);
        if self.service.tracker().len() != tracked {
            info!(devices = devices.len(), "Paired devices changed");
        }

        let report = self
            .service
            .run_cycle(self.source.as_ref(), self.sink.as_ref())
            .await;

        for update in &report.updates {
            debug!(device = %update.device, reading = ?update.reading, "Capability updated");
            if let Reading::Detect(detected) = update.reading {
                if let Err(e) = self
                    .state
                    .registry_mut()
                    .set_detected(&update.device, detected)
                {
                    warn!(device = %update.device, error = %e, "Failed to persist detect value");
                }
            }
        }

        report
    }

    /// Run cycles until `shutdown` resolves.
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        info!("Scan loop started");

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                _ = self.cycle() => {}
            }

            let interval = self.state.config().scan.update_interval();
            tokio::select! {
                () = &mut shutdown => break,
                () = tokio::time::sleep(interval) => {}
            }
        }

        info!("Scan loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use beacon_core::metadata::extract_metadata;
    use beacon_core::{
        Config, DeviceRegistry, FrameDecoder, MemorySink, RawAdvertisement, ReplaySource,
        Trigger,
    };
    use tempfile::TempDir;

    struct SharedSink(Arc<MemorySink>);

    impl EventSink for SharedSink {
        fn emit(&self, trigger: &Trigger) -> beacon_core::Result<()> {
            self.0.emit(trigger)
        }
    }

    fn keys() -> RawAdvertisement {
        RawAdvertisement::new("AA:BB:CC:DD:EE:01", -60).with_name("Keys")
    }

    fn state(dir: &TempDir, detected: Option<bool>) -> DaemonState {
        let mut registry = DeviceRegistry::open_in(dir.path()).unwrap();
        let beacon = FrameDecoder::default().decode(&keys());
        let metadata = extract_metadata(&beacon).unwrap();
        registry.pair(&metadata).unwrap();
        if let Some(detected) = detected {
            registry.set_detected(&metadata.identity, detected).unwrap();
        }

        let config_path = dir.path().join("config.toml");
        std::fs::write(
            &config_path,
            "[scan]\nverificationAmountInside = 1\nverificationAmountOutside = 1\nscanTimeoutMs = 100\n",
        )
        .unwrap();
        DaemonState::from_parts(config_path, Config::default(), registry)
    }

    #[tokio::test]
    async fn test_cycle_persists_detect_and_fires_triggers() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(MemorySink::new());
        let source = ReplaySource::new(vec![vec![keys()], vec![]]);
        let mut daemon = Daemon::new(
            state(&dir, Some(false)),
            Box::new(source),
            Box::new(SharedSink(Arc::clone(&sink))),
        );

        let report = daemon.cycle().await;
        assert_eq!(report.transitions.len(), 1);
        assert_eq!(sink.triggers().len(), 4);
        assert_eq!(daemon.state().registry().devices()[0].detected, Some(true));

        daemon.cycle().await;
        assert_eq!(sink.triggers().len(), 8);
        let reopened = DeviceRegistry::open_in(dir.path()).unwrap();
        assert_eq!(reopened.devices()[0].detected, Some(false));
    }

    #[tokio::test]
    async fn test_cold_start_persists_without_triggers() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(MemorySink::new());
        let source = ReplaySource::new(vec![vec![keys()]]);
        let mut daemon = Daemon::new(
            state(&dir, None),
            Box::new(source),
            Box::new(SharedSink(Arc::clone(&sink))),
        );

        daemon.cycle().await;
        assert!(sink.triggers().is_empty());
        assert_eq!(daemon.state().registry().devices()[0].detected, Some(true));
    }

    #[tokio::test]
    async fn test_cycle_keeps_pairings_made_elsewhere() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(MemorySink::new());
        let bag = RawAdvertisement::new("AA:BB:CC:DD:EE:02", -70).with_name("Bag");
        let source = ReplaySource::new(vec![vec![keys(), bag.clone()]]);
        let mut daemon = Daemon::new(
            state(&dir, Some(false)),
            Box::new(source),
            Box::new(SharedSink(Arc::clone(&sink))),
        );

        let mut cli = DeviceRegistry::open_in(dir.path()).unwrap();
        let bag_metadata = extract_metadata(&FrameDecoder::default().decode(&bag)).unwrap();
        cli.pair(&bag_metadata).unwrap();

        let report = daemon.cycle().await;
        assert_eq!(report.transitions.len(), 1);
        assert!(report.updates.iter().any(|update| update.device == bag_metadata.identity
            && update.reading == Reading::Detect(true)));

        let on_disk = DeviceRegistry::open_in(dir.path()).unwrap();
        assert_eq!(on_disk.devices().len(), 2);
        assert!(on_disk.devices().iter().all(|device| device.detected == Some(true)));

        cli.unpair(&bag_metadata.identity).unwrap();
        daemon.cycle().await;
        assert!(!daemon.service.tracker().is_tracked(&bag_metadata.identity));
        let on_disk = DeviceRegistry::open_in(dir.path()).unwrap();
        assert_eq!(on_disk.devices().len(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let mut daemon = Daemon::new(
            state(&dir, Some(false)),
            Box::new(ReplaySource::new(vec![vec![keys()]])),
            Box::new(SharedSink(Arc::new(MemorySink::new()))),
        );

        tokio::time::timeout(
            Duration::from_secs(5),
            daemon.run(tokio::time::sleep(Duration::from_millis(50))),
        )
        .await
        .unwrap();
        assert_eq!(daemon.state().registry().devices()[0].detected, Some(true));
    }
}
