//! In-process star network
//!
//! One coordinator endpoint plus any number of participant endpoints, all
//! inside the same runtime. Each endpoint gets a [`Transport`] and an
//! inbox; [`drive_coordinator`] / [`drive_participant`] pump an inbox into
//! the role's `handle_event`.
//!
//! Latency is per endpoint and applies to both directions of its link, so a
//! message from A to B waits `latency(A) + latency(B)`. Delivery order on a
//! link is preserved.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use contracts::{ContractError, DeviceId, Transport};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::coordinator::Coordinator;
use crate::event::{CoordinatorEvent, ParticipantEvent};
use crate::participant::Participant;

/// What an endpoint's inbox carries
#[derive(Debug, Clone)]
pub enum Delivery {
    ConnectionInitiated { peer: DeviceId, display_name: String },
    ConnectionResult { peer: DeviceId, accepted: bool },
    Connected { peer: DeviceId },
    Payload { from: DeviceId, bytes: Bytes },
    Disconnected { peer: DeviceId },
}

/// Receiving side of an endpoint
pub type Inbox = mpsc::UnboundedReceiver<Delivery>;

type Link = mpsc::UnboundedSender<(Instant, Delivery)>;

struct Endpoint {
    inbox: mpsc::UnboundedSender<Delivery>,
    display_name: String,
    latency: Duration,
    connected: bool,
    /// Outbound delayed links, by destination
    links: HashMap<DeviceId, Link>,
}

struct Hub {
    coordinator: DeviceId,
    endpoints: Mutex<HashMap<DeviceId, Endpoint>>,
}

impl Hub {
    fn endpoints(&self) -> MutexGuard<'_, HashMap<DeviceId, Endpoint>> {
        self.endpoints.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver(&self, from: &DeviceId, to: &DeviceId, bytes: Bytes) -> Result<(), ContractError> {
        let mut endpoints = self.endpoints();

        let (target_inbox, target_latency) = match endpoints.get(to) {
            Some(target) if self.linked(&endpoints, from, to) => {
                (target.inbox.clone(), target.latency)
            }
            Some(_) => return Err(ContractError::transport(to, "not connected")),
            None => return Err(ContractError::transport(to, "unknown peer")),
        };
        let source = endpoints
            .get_mut(from)
            .ok_or_else(|| ContractError::transport(from, "sender not registered"))?;

        let delivery = Delivery::Payload {
            from: from.clone(),
            bytes,
        };
        let latency = source.latency + target_latency;
        if latency.is_zero() {
            return target_inbox
                .send(delivery)
                .map_err(|_| ContractError::transport(to, "inbox closed"));
        }

        let link = source
            .links
            .entry(to.clone())
            .or_insert_with(|| spawn_link(target_inbox));
        link.send((Instant::now() + latency, delivery))
            .map_err(|_| ContractError::transport(to, "link closed"))
    }

    /// Star topology: only coordinator <-> connected participant
    fn linked(&self, endpoints: &HashMap<DeviceId, Endpoint>, a: &DeviceId, b: &DeviceId) -> bool {
        let participant = if *a == self.coordinator {
            b
        } else if *b == self.coordinator {
            a
        } else {
            return false;
        };
        endpoints.contains_key(&self.coordinator)
            && endpoints.get(participant).is_some_and(|e| e.connected)
    }

    fn notify(&self, to: &DeviceId, delivery: Delivery) {
        if let Some(endpoint) = self.endpoints().get(to) {
            // Closed inbox means the driver is gone
            let _ = endpoint.inbox.send(delivery);
        }
    }
}

/// Forward delayed deliveries in order, each at its due time
fn spawn_link(target: mpsc::UnboundedSender<Delivery>) -> Link {
    let (tx, mut rx) = mpsc::unbounded_channel::<(Instant, Delivery)>();
    tokio::spawn(async move {
        while let Some((due, delivery)) = rx.recv().await {
            tokio::time::sleep_until(due).await;
            if target.send(delivery).is_err() {
                break;
            }
        }
    });
    tx
}

/// Transport handle of one endpoint
pub struct LoopbackTransport {
    hub: Arc<Hub>,
    local: DeviceId,
}

impl Transport for LoopbackTransport {
    fn local_id(&self) -> &DeviceId {
        &self.local
    }

    fn send(&self, to: &DeviceId, payload: Bytes) -> Result<(), ContractError> {
        trace!(from = %self.local, to = %to, len = payload.len(), "loopback send");
        self.hub.deliver(&self.local, to, payload)
    }

    fn broadcast(&self, payload: Bytes) {
        for peer in self.connected_peers() {
            if let Err(e) = self.hub.deliver(&self.local, &peer, payload.clone()) {
                warn!(error = %e, "broadcast delivery failed");
            }
        }
    }

    fn connected_peers(&self) -> Vec<DeviceId> {
        let endpoints = self.hub.endpoints();
        if self.local == self.hub.coordinator {
            let mut peers: Vec<_> = endpoints
                .iter()
                .filter(|(id, e)| **id != self.hub.coordinator && e.connected)
                .map(|(id, _)| id.clone())
                .collect();
            peers.sort();
            peers
        } else if self.hub.linked(&endpoints, &self.local, &self.hub.coordinator) {
            vec![self.hub.coordinator.clone()]
        } else {
            Vec::new()
        }
    }
}

/// In-process network with one coordinator
#[derive(Clone)]
pub struct LoopbackNetwork {
    hub: Arc<Hub>,
}

impl Default for LoopbackNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self {
            hub: Arc::new(Hub {
                coordinator: DeviceId::coordinator(),
                endpoints: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Register the coordinator's endpoint
    pub fn register_coordinator(&self) -> (Arc<LoopbackTransport>, Inbox) {
        let id = self.hub.coordinator.clone();
        self.register(id, "coordinator", Duration::ZERO)
    }

    /// Register an endpoint; it stays disconnected until [`Self::connect`]
    pub fn register(
        &self,
        id: impl Into<DeviceId>,
        display_name: impl Into<String>,
        latency: Duration,
    ) -> (Arc<LoopbackTransport>, Inbox) {
        let id = id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        self.hub.endpoints().insert(
            id.clone(),
            Endpoint {
                inbox: tx,
                display_name: display_name.into(),
                latency,
                connected: false,
                links: HashMap::new(),
            },
        );
        debug!(device_id = %id, latency_ms = latency.as_millis() as u64, "endpoint registered");

        let transport = Arc::new(LoopbackTransport {
            hub: self.hub.clone(),
            local: id,
        });
        (transport, rx)
    }

    /// Connect a participant to the coordinator
    pub fn connect(&self, id: &DeviceId) -> Result<(), ContractError> {
        let display_name = self.mark(id, true)?;
        let coordinator = self.hub.coordinator.clone();

        self.hub.notify(
            id,
            Delivery::Connected {
                peer: coordinator.clone(),
            },
        );
        self.hub.notify(
            &coordinator,
            Delivery::ConnectionInitiated {
                peer: id.clone(),
                display_name,
            },
        );
        self.hub.notify(
            &coordinator,
            Delivery::ConnectionResult {
                peer: id.clone(),
                accepted: true,
            },
        );
        info!(device_id = %id, "loopback connected");
        Ok(())
    }

    /// Simulate a refused connection attempt
    pub fn reject(&self, id: &DeviceId) -> Result<(), ContractError> {
        let display_name = self.mark(id, false)?;
        let coordinator = self.hub.coordinator.clone();
        self.hub.notify(
            &coordinator,
            Delivery::ConnectionInitiated {
                peer: id.clone(),
                display_name,
            },
        );
        self.hub.notify(
            &coordinator,
            Delivery::ConnectionResult {
                peer: id.clone(),
                accepted: false,
            },
        );
        Ok(())
    }

    /// Drop a participant's link; both sides are told
    pub fn disconnect(&self, id: &DeviceId) -> Result<(), ContractError> {
        self.mark(id, false)?;
        let coordinator = self.hub.coordinator.clone();
        {
            let mut endpoints = self.hub.endpoints();
            if let Some(endpoint) = endpoints.get_mut(&coordinator) {
                endpoint.links.remove(id);
            }
        }

        self.hub.notify(id, Delivery::Disconnected { peer: coordinator.clone() });
        self.hub
            .notify(&coordinator, Delivery::Disconnected { peer: id.clone() });
        info!(device_id = %id, "loopback disconnected");
        Ok(())
    }

    /// Drop every endpoint; drivers exit once their inbox drains
    pub fn close(&self) {
        self.hub.endpoints().clear();
    }

    fn mark(&self, id: &DeviceId, connected: bool) -> Result<String, ContractError> {
        if *id == self.hub.coordinator {
            return Err(ContractError::transport(id, "coordinator cannot connect to itself"));
        }
        let mut endpoints = self.hub.endpoints();
        let endpoint = endpoints
            .get_mut(id)
            .ok_or_else(|| ContractError::transport(id, "unknown peer"))?;
        endpoint.connected = connected;
        if !connected {
            endpoint.links.clear();
        }
        Ok(endpoint.display_name.clone())
    }
}

/// Feed a coordinator from its inbox until the inbox closes
pub fn drive_coordinator(coordinator: Arc<Coordinator>, mut inbox: Inbox) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(delivery) = inbox.recv().await {
            let event = match delivery {
                Delivery::ConnectionInitiated { peer, display_name } => {
                    CoordinatorEvent::ConnectionInitiated {
                        device: peer,
                        display_name,
                    }
                }
                Delivery::ConnectionResult { peer, accepted } => CoordinatorEvent::ConnectionResult {
                    device: peer,
                    accepted,
                },
                Delivery::Payload { from, bytes } => CoordinatorEvent::Payload { from, bytes },
                Delivery::Disconnected { peer } => CoordinatorEvent::Disconnected { device: peer },
                Delivery::Connected { .. } => continue,
            };
            let device = event.device().clone();
            if let Err(e) = coordinator.handle_event(event).await {
                warn!(device_id = %device, error = %e, "coordinator event rejected");
            }
        }
        debug!("coordinator inbox closed");
    })
}

/// Feed a participant from its inbox until the inbox closes
pub fn drive_participant(participant: Arc<Participant>, mut inbox: Inbox) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(delivery) = inbox.recv().await {
            let event = match delivery {
                Delivery::Connected { peer } => ParticipantEvent::Connected { coordinator: peer },
                Delivery::Payload { from, bytes } => ParticipantEvent::Payload { from, bytes },
                Delivery::Disconnected { .. } => ParticipantEvent::Disconnected,
                Delivery::ConnectionInitiated { .. } | Delivery::ConnectionResult { .. } => continue,
            };
            if let Err(e) = participant.handle_event(event).await {
                warn!(error = %e, "participant event rejected");
            }
        }
        debug!("participant inbox closed");
    })
}
