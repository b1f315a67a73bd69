//! The per-session peer connection manager.

use crate::config::{IceServer, RtcConfig};
use crate::error::RtcError;
use crate::stats::{ConnectionStats, NetworkQualitySample, QualityMonitor};
use crate::transport::{
    CaptureHints, DataChannelInfo, IceCandidate, IceConnectionState, PeerConnectionState,
    PeerTransport, PeerTransportFactory, RemoteTrack, RtcConfiguration, SessionDescription,
    TransportEvent,
};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Capacity of both the transport and the outward connection event channels.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Typed events delivered to the session. Replaces per-event callbacks.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    IceCandidate(IceCandidate),
    Track(RemoteTrack),
    ConnectionStateChanged(PeerConnectionState),
    IceStateChanged(IceConnectionState),
    DataChannel(DataChannelInfo),
    NegotiationNeeded,
    Stats(ConnectionStats),
    /// Advisory quality classification derived from the latest poll.
    Quality(NetworkQualitySample),
    /// ICE failed once; a single restart is in progress.
    IceRestarting,
    /// Terminal: the connection failed and will not be retried.
    Failed(RtcError),
}

struct ActiveConnection {
    transport: Arc<dyn PeerTransport>,
    pump: JoinHandle<()>,
    poller: JoinHandle<()>,
}

enum Lifecycle {
    Uninitialized,
    Active(ActiveConnection),
    Closed,
}

/// Owns one real-time media/data connection.
pub struct PeerConnectionManager {
    config: RtcConfig,
    lifecycle: Mutex<Lifecycle>,
    quality: Arc<RwLock<QualityMonitor>>,
}

impl PeerConnectionManager {
    pub fn new(config: RtcConfig) -> Self {
        let quality = QualityMonitor::new(config.quality_history);
        Self {
            config,
            lifecycle: Mutex::new(Lifecycle::Uninitialized),
            quality: Arc::new(RwLock::new(quality)),
        }
    }

    /// Initialises the connection and starts the event pump and stats poller.
    ///
    /// When `ice_servers` is empty the configured defaults are used. Capture
    /// processing hints are always disabled at this layer.
    pub async fn create_connection(
        &self,
        factory: &dyn PeerTransportFactory,
        ice_servers: Vec<IceServer>,
    ) -> Result<mpsc::Receiver<ConnectionEvent>, RtcError> {
        match &*self.lock_lifecycle() {
            Lifecycle::Uninitialized => {}
            Lifecycle::Active(_) => {
                return Err(RtcError::Negotiation(
                    "connection already initialized".to_string(),
                ))
            }
            Lifecycle::Closed => {
                return Err(RtcError::Negotiation("connection is closed".to_string()))
            }
        }

        let ice_servers = if ice_servers.is_empty() {
            self.config.ice_servers.clone()
        } else {
            ice_servers
        };
        let configuration = RtcConfiguration {
            ice_servers,
            capture_hints: CaptureHints::default(),
        };

        let (transport_tx, transport_rx) = mpsc::channel(DEFAULT_EVENT_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(DEFAULT_EVENT_CHANNEL_CAPACITY);
        let transport = factory.create(&configuration, transport_tx).await?;

        let pump = tokio::spawn(run_event_pump(
            Arc::clone(&transport),
            transport_rx,
            event_tx.clone(),
            self.config.ice_restart_timeout(),
        ));
        let poller = tokio::spawn(run_stats_poller(
            Arc::clone(&transport),
            event_tx,
            Arc::clone(&self.quality),
            self.config.stats_interval(),
        ));

        let installed = {
            let mut lifecycle = self.lock_lifecycle();
            if matches!(*lifecycle, Lifecycle::Uninitialized) {
                *lifecycle = Lifecycle::Active(ActiveConnection {
                    transport: Arc::clone(&transport),
                    pump,
                    poller,
                });
                None
            } else {
                Some((pump, poller))
            }
        };
        if let Some((pump, poller)) = installed {
            // Lost a race with close() or a concurrent create_connection.
            pump.abort();
            poller.abort();
            transport.close().await;
            return Err(RtcError::Negotiation(
                "connection changed state during initialization".to_string(),
            ));
        }

        info!(
            ice_servers = configuration.ice_servers.len(),
            "peer connection created"
        );
        Ok(event_rx)
    }

    pub async fn offer(&self) -> Result<SessionDescription, RtcError> {
        self.transport()?.create_offer(false).await
    }

    pub async fn answer(&self) -> Result<SessionDescription, RtcError> {
        self.transport()?.create_answer().await
    }

    pub async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), RtcError> {
        self.transport()?.set_local_description(description).await
    }

    pub async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), RtcError> {
        self.transport()?.set_remote_description(description).await
    }

    pub async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), RtcError> {
        self.transport()?.add_ice_candidate(candidate).await
    }

    /// Polls transport statistics once and aggregates them.
    pub async fn get_stats(&self) -> Result<ConnectionStats, RtcError> {
        let reports = self.transport()?.stats().await?;
        Ok(ConnectionStats::from_reports(&reports))
    }

    /// Most recent quality sample from the poller, if any.
    pub fn latest_quality(&self) -> Option<NetworkQualitySample> {
        self.quality
            .read()
            .ok()
            .and_then(|monitor| monitor.latest().cloned())
    }

    /// Retained quality samples, oldest first.
    pub fn quality_history(&self) -> Vec<NetworkQualitySample> {
        self.quality
            .read()
            .map(|monitor| monitor.history().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_active(&self) -> bool {
        matches!(*self.lock_lifecycle(), Lifecycle::Active(_))
    }

    /// Stops the pump and poller and releases the transport. Idempotent.
    pub async fn close(&self) {
        let previous = std::mem::replace(&mut *self.lock_lifecycle(), Lifecycle::Closed);
        if let Lifecycle::Active(active) = previous {
            active.pump.abort();
            active.poller.abort();
            active.transport.close().await;
            info!("peer connection closed");
        }
    }

    fn transport(&self) -> Result<Arc<dyn PeerTransport>, RtcError> {
        match &*self.lock_lifecycle() {
            Lifecycle::Active(active) => Ok(Arc::clone(&active.transport)),
            Lifecycle::Uninitialized => Err(RtcError::Negotiation(
                "connection is not initialized".to_string(),
            )),
            Lifecycle::Closed => Err(RtcError::Negotiation("connection is closed".to_string())),
        }
    }

    fn lock_lifecycle(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        // The guarded data is a plain enum swap; a poisoned lock still holds a
        // consistent value.
        self.lifecycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for PeerConnectionManager {
    fn drop(&mut self) {
        if let Lifecycle::Active(active) = &*self.lock_lifecycle() {
            active.pump.abort();
            active.poller.abort();
        }
    }
}

/// Tracks the single ICE restart a connection is allowed.
#[derive(Debug, Default)]
struct RestartBudget {
    attempted: bool,
    deadline: Option<Instant>,
}

impl RestartBudget {
    fn replenish(&mut self) {
        self.attempted = false;
        self.deadline = None;
    }
}

async fn run_event_pump(
    transport: Arc<dyn PeerTransport>,
    mut transport_rx: mpsc::Receiver<TransportEvent>,
    event_tx: mpsc::Sender<ConnectionEvent>,
    restart_timeout: Duration,
) {
    let mut budget = RestartBudget::default();

    loop {
        let next = match budget.deadline {
            Some(deadline) => tokio::select! {
                event = transport_rx.recv() => event,
                () = tokio::time::sleep_until(deadline) => {
                    warn!(timeout_ms = restart_timeout.as_millis() as u64, "ICE restart timed out");
                    let _ = event_tx
                        .send(ConnectionEvent::Failed(RtcError::Connection(format!(
                            "ICE restart did not recover within {}ms",
                            restart_timeout.as_millis()
                        ))))
                        .await;
                    return;
                }
            },
            None => transport_rx.recv().await,
        };

        let Some(event) = next else {
            debug!("transport event channel closed");
            return;
        };

        let outward = match event {
            TransportEvent::IceCandidate(candidate) => ConnectionEvent::IceCandidate(candidate),
            TransportEvent::Track(track) => ConnectionEvent::Track(track),
            TransportEvent::ConnectionState(state) => ConnectionEvent::ConnectionStateChanged(state),
            TransportEvent::DataChannel(channel) => ConnectionEvent::DataChannel(channel),
            TransportEvent::NegotiationNeeded => ConnectionEvent::NegotiationNeeded,
            TransportEvent::IceConnectionState(state) => {
                if event_tx
                    .send(ConnectionEvent::IceStateChanged(state))
                    .await
                    .is_err()
                {
                    return;
                }
                match state {
                    IceConnectionState::Failed if budget.attempted => {
                        warn!("ICE failed again after restart; giving up");
                        let _ = event_tx
                            .send(ConnectionEvent::Failed(RtcError::Connection(
                                "ICE connection failed after restart".to_string(),
                            )))
                            .await;
                        return;
                    }
                    IceConnectionState::Failed => {
                        info!("ICE connection failed; attempting restart");
                        budget.attempted = true;
                        budget.deadline = Some(Instant::now() + restart_timeout);
                        if let Err(e) = transport.restart_ice().await {
                            warn!("ICE restart could not be started: {}", e);
                            let _ = event_tx
                                .send(ConnectionEvent::Failed(RtcError::Connection(format!(
                                    "ICE restart failed: {e}"
                                ))))
                                .await;
                            return;
                        }
                        ConnectionEvent::IceRestarting
                    }
                    IceConnectionState::Connected | IceConnectionState::Completed => {
                        if budget.attempted {
                            info!("ICE restart recovered the connection");
                        }
                        budget.replenish();
                        continue;
                    }
                    _ => continue,
                }
            }
        };

        if event_tx.send(outward).await.is_err() {
            return;
        }
    }
}

async fn run_stats_poller(
    transport: Arc<dyn PeerTransport>,
    event_tx: mpsc::Sender<ConnectionEvent>,
    quality: Arc<RwLock<QualityMonitor>>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately; skip it so the first poll lands
    // one interval after connection setup.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let reports = match transport.stats().await {
            Ok(reports) => reports,
            Err(e) => {
                warn!("stats poll failed: {}", e);
                continue;
            }
        };

        let stats = ConnectionStats::from_reports(&reports);
        let sample = stats.quality_sample();
        debug!(
            tier = %sample.tier,
            loss_pct = sample.packet_loss_pct,
            rtt_ms = sample.rtt_ms,
            "network quality sample"
        );
        if let Ok(mut monitor) = quality.write() {
            monitor.record(sample.clone());
        }

        if event_tx.send(ConnectionEvent::Stats(stats)).await.is_err()
            || event_tx.send(ConnectionEvent::Quality(sample)).await.is_err()
        {
            return;
        }
    }
}
