//! Update coordinator
//!
//! Drives one run through the update state machine:
//!
//! ```text
//! DETECT -> COMPARE -> { UNCHANGED | AUTHORIZE_CHECK }
//!                          -> { BOOTSTRAP_PENDING | UPDATE }
//!                          -> { UPDATED | FAILED }
//! ```
//!
//! The coordinator only talks to the zone API through the [`ZoneClient`]
//! trait, and only once change detection says there is work to do: an
//! unchanged address ends the run with zero API calls.

use tracing::{info, warn};

use crate::detect::AddressDetector;
use crate::error::{Error, Result};
use crate::ovh::{BootstrapOutcome, ZoneClient};
use crate::state::{PersistedState, StateStore};

//==============================================================================
// Types
//==============================================================================

/// Terminal state of one run (the FAILED state is the `Err` arm of `run`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Detected address equals the persisted one; nothing was done
    Unchanged,
    /// The record now carries the detected address, which was persisted
    Updated {
        address: String,
    },
    /// A consumer key was issued; a human must open the validation URL
    /// before the next run can sign calls
    BootstrapPending(BootstrapOutcome),
    /// Every detection source failed; no API call was made
    AddressUnavailable,
}

/// Composes detection, change tracking and the zone client into one run
pub struct UpdateCoordinator<C: ZoneClient> {
    detector: AddressDetector,
    store: StateStore,
    client: C,
    /// Whether the configuration already carries a consumer key; without
    /// one there is nothing to probe, the run goes straight to bootstrap
    has_consumer_key: bool,
}

impl<C: ZoneClient> UpdateCoordinator<C> {
    pub fn new(
        detector: AddressDetector,
        store: StateStore,
        client: C,
        has_consumer_key: bool,
    ) -> Self {
        Self {
            detector,
            store,
            client,
            has_consumer_key,
        }
    }

    /// Runs the state machine to completion.
    ///
    /// Persisted state is written only after a confirmed successful update,
    /// so a failed run leaves the previous address in place and the next
    /// invocation retries the same change.
    pub async fn run(&self) -> Result<RunOutcome> {
        // DETECT
        let address = match self.detector.detect().await {
            Some(address) => address,
            None => {
                // Updating a record without an address is meaningless, so
                // the run halts here instead of limping toward the API.
                warn!("No detection source yielded an address");
                return Ok(RunOutcome::AddressUnavailable);
            }
        };

        // COMPARE
        if let Some(state) = self.store.load() {
            if state.ip == address {
                info!("Address {} unchanged since last run; nothing to do", address);
                return Ok(RunOutcome::Unchanged);
            }
            info!("Address changed: {} -> {}", state.ip, address);
        } else {
            info!("No prior state; treating {} as a fresh address", address);
        }

        // AUTHORIZE_CHECK
        if !self.has_consumer_key {
            info!("No consumer key yet; starting the bootstrap flow");
            return Ok(RunOutcome::BootstrapPending(self.client.authenticate().await?));
        }
        match self.client.probe().await {
            Ok(()) => {}
            Err(Error::Unauthorized) => {
                info!("Consumer key rejected; requesting a fresh one");
                return Ok(RunOutcome::BootstrapPending(self.client.authenticate().await?));
            }
            Err(e) => return Err(e),
        }

        // UPDATE
        self.client.update_host(&address, true).await?;
        self.store
            .save(&PersistedState {
                ip: address.clone(),
            })
            .map_err(|e| Error::unexpected(format!("record updated but state not persisted: {e:#}")))?;
        info!("Record updated to {}", address);
        Ok(RunOutcome::Updated { address })
    }
}

//==============================================================================
// Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{Parser, Source};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use async_trait::async_trait;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves one HTTP request with a canned plaintext body and returns the URL
    async fn spawn_echo(body: &str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let body = body.to_string();
        tokio::spawn(async move {
            if let Ok((mut socket, _peer)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let reply = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{}/", addr)
    }

    #[derive(Clone, Default)]
    struct CallCounts {
        probe: Arc<AtomicUsize>,
        authenticate: Arc<AtomicUsize>,
        update: Arc<AtomicUsize>,
    }

    impl CallCounts {
        fn total(&self) -> usize {
            self.probe.load(Ordering::SeqCst)
                + self.authenticate.load(Ordering::SeqCst)
                + self.update.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct MockClient {
        counts: CallCounts,
        probe_denied: bool,
        update_denied: bool,
    }

    #[async_trait]
    impl ZoneClient for MockClient {
        async fn probe(&self) -> Result<()> {
            self.counts.probe.fetch_add(1, Ordering::SeqCst);
            if self.probe_denied {
                Err(Error::Unauthorized)
            } else {
                Ok(())
            }
        }

        async fn authenticate(&self) -> Result<BootstrapOutcome> {
            self.counts.authenticate.fetch_add(1, Ordering::SeqCst);
            Ok(BootstrapOutcome {
                consumer_key: "issued-ck".to_string(),
                validation_url: "https://validate.example/token".to_string(),
            })
        }

        async fn update_host(&self, _address: &str, _create: bool) -> Result<()> {
            self.counts.update.fetch_add(1, Ordering::SeqCst);
            if self.update_denied {
                Err(Error::Unauthorized)
            } else {
                Ok(())
            }
        }
    }

    fn store_with(dir: &TempDir, ip: Option<&str>) -> StateStore {
        let store = StateStore::new(dir.path().join("state.json"));
        if let Some(ip) = ip {
            store
                .save(&PersistedState { ip: ip.to_string() })
                .expect("seed state");
        }
        store
    }

    async fn detector_for(address: &str) -> AddressDetector {
        let url = spawn_echo(address).await;
        AddressDetector::with_sources(vec![Source::new(url, Parser::Plain)]).expect("detector")
    }

    #[tokio::test]
    async fn unchanged_address_makes_zero_api_calls() {
        let dir = TempDir::new().expect("temp dir");
        let store = store_with(&dir, Some("203.0.113.5"));
        let detector = detector_for("203.0.113.5").await;

        let client = MockClient::default();
        let counts = client.counts.clone();
        let coordinator = UpdateCoordinator::new(detector, store, client, true);

        let outcome = coordinator.run().await.expect("run");
        assert_eq!(outcome, RunOutcome::Unchanged);
        assert_eq!(counts.total(), 0);
    }

    #[tokio::test]
    async fn changed_address_updates_and_persists() {
        let dir = TempDir::new().expect("temp dir");
        let store = store_with(&dir, Some("203.0.113.5"));
        let detector = detector_for("203.0.113.6").await;

        let client = MockClient::default();
        let counts = client.counts.clone();
        let coordinator = UpdateCoordinator::new(detector, store, client, true);

        let outcome = coordinator.run().await.expect("run");
        assert_eq!(
            outcome,
            RunOutcome::Updated {
                address: "203.0.113.6".to_string()
            }
        );
        assert_eq!(counts.probe.load(Ordering::SeqCst), 1);
        assert_eq!(counts.update.load(Ordering::SeqCst), 1);
        assert_eq!(counts.authenticate.load(Ordering::SeqCst), 0);

        let persisted = StateStore::new(dir.path().join("state.json"))
            .load()
            .expect("state");
        assert_eq!(persisted.ip, "203.0.113.6");
    }

    #[tokio::test]
    async fn fresh_address_with_no_prior_state_updates() {
        let dir = TempDir::new().expect("temp dir");
        let store = store_with(&dir, None);
        let detector = detector_for("203.0.113.5").await;

        let coordinator =
            UpdateCoordinator::new(detector, store, MockClient::default(), true);
        let outcome = coordinator.run().await.expect("run");
        assert!(matches!(outcome, RunOutcome::Updated { .. }));
    }

    #[tokio::test]
    async fn missing_consumer_key_goes_straight_to_bootstrap() {
        let dir = TempDir::new().expect("temp dir");
        let store = store_with(&dir, None);
        let detector = detector_for("203.0.113.5").await;

        let client = MockClient::default();
        let counts = client.counts.clone();
        let coordinator = UpdateCoordinator::new(detector, store, client, false);

        let outcome = coordinator.run().await.expect("run");
        match outcome {
            RunOutcome::BootstrapPending(bootstrap) => {
                assert_eq!(bootstrap.consumer_key, "issued-ck");
                assert!(bootstrap.validation_url.starts_with("https://"));
            }
            other => panic!("expected bootstrap, got {:?}", other),
        }
        assert_eq!(counts.probe.load(Ordering::SeqCst), 0);
        assert_eq!(counts.authenticate.load(Ordering::SeqCst), 1);
        assert_eq!(counts.update.load(Ordering::SeqCst), 0);
        // state must stay untouched until a real update lands
        assert!(StateStore::new(dir.path().join("state.json")).load().is_none());
    }

    #[tokio::test]
    async fn rejected_probe_triggers_bootstrap() {
        let dir = TempDir::new().expect("temp dir");
        let store = store_with(&dir, None);
        let detector = detector_for("203.0.113.5").await;

        let client = MockClient {
            probe_denied: true,
            ..Default::default()
        };
        let counts = client.counts.clone();
        let coordinator = UpdateCoordinator::new(detector, store, client, true);

        let outcome = coordinator.run().await.expect("run");
        assert!(matches!(outcome, RunOutcome::BootstrapPending(_)));
        assert_eq!(counts.probe.load(Ordering::SeqCst), 1);
        assert_eq!(counts.authenticate.load(Ordering::SeqCst), 1);
        assert_eq!(counts.update.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unauthorized_update_fails_and_leaves_state_alone() {
        let dir = TempDir::new().expect("temp dir");
        let store = store_with(&dir, Some("203.0.113.5"));
        let detector = detector_for("203.0.113.6").await;

        let client = MockClient {
            update_denied: true,
            ..Default::default()
        };
        let coordinator = UpdateCoordinator::new(detector, store, client, true);

        let err = coordinator.run().await.expect_err("run must fail");
        assert!(matches!(err, Error::Unauthorized));

        let persisted = StateStore::new(dir.path().join("state.json"))
            .load()
            .expect("state");
        assert_eq!(persisted.ip, "203.0.113.5");
    }

    #[tokio::test]
    async fn exhausted_detection_halts_without_api_calls() {
        let dir = TempDir::new().expect("temp dir");
        let store = store_with(&dir, None);
        let detector = AddressDetector::with_sources(Vec::new()).expect("detector");

        let client = MockClient::default();
        let counts = client.counts.clone();
        let coordinator = UpdateCoordinator::new(detector, store, client, true);

        let outcome = coordinator.run().await.expect("run");
        assert_eq!(outcome, RunOutcome::AddressUnavailable);
        assert_eq!(counts.total(), 0);
    }
}
