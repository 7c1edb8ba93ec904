//! Vehicle-side session client
//!
//! One `EvClient` per simulated vehicle. It dials the EVSE's session
//! server, opens a session, and then acts on [`EvCommand`]s from the
//! registry. A background SOC monitor steps the vehicle's state of
//! charge and sends a single stop request when the battery is full.

use std::sync::Arc;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use voltgrid_core::config::{EvConfig, NetworkConfig};
use voltgrid_core::fleet::FleetState;
use voltgrid_core::ident::iso15118_port_for;
use voltgrid_core::registry::{EvCommand, SessionRegistry};

use crate::messages::*;

/// Vehicle side of one charging session
pub struct EvClient {
    ev_id: String,
    evse_id: u32,
    session_id: String,
    fleet: FleetState,
    config: EvConfig,
    network: NetworkConfig,

    /// Present while connected; send helpers degrade to a warning when
    /// the session is down.
    outgoing: parking_lot::Mutex<Option<mpsc::UnboundedSender<Envelope>>>,
}

impl EvClient {
    pub fn new(
        ev_id: impl Into<String>,
        evse_id: u32,
        fleet: FleetState,
        config: EvConfig,
        network: NetworkConfig,
    ) -> Arc<Self> {
        let ev_id = ev_id.into();
        let session_id = format!("session-{}-{}", ev_id, Utc::now().timestamp());
        Arc::new(Self {
            ev_id,
            evse_id,
            session_id,
            fleet,
            config,
            network,
            outgoing: parking_lot::Mutex::new(None),
        })
    }

    pub fn ev_id(&self) -> &str {
        &self.ev_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn attach_outgoing(&self, tx: mpsc::UnboundedSender<Envelope>) {
        *self.outgoing.lock() = Some(tx);
    }

    fn detach_outgoing(&self) {
        *self.outgoing.lock() = None;
    }

    /// Queue a message for the session, or warn when there is none.
    fn send(&self, message: SessionMessage) {
        let guard = self.outgoing.lock();
        match guard.as_ref() {
            Some(tx) => {
                if tx.send(Envelope::new(message)).is_err() {
                    warn!(ev_id = %self.ev_id, "session sender gone, message dropped");
                }
            }
            None => warn!(
                ev_id = %self.ev_id,
                "no session, message dropped"
            ),
        }
    }

    pub fn send_connection_request(&self) {
        self.send(SessionMessage::ConnectionRequest(ConnectionRequest {
            ev_id: self.ev_id.clone(),
            evse_id: self.evse_id,
            session_id: self.session_id.clone(),
            protocol_version: self.config.protocol_version.clone(),
        }));
    }

    pub fn send_ev_information_request(&self) {
        self.send(SessionMessage::EvInformationRequest(EvInformationRequest {
            session_id: self.session_id.clone(),
        }));
    }

    /// Ask the station to start charging, with the demand taken from the
    /// vehicle's fleet record.
    pub fn send_charging_start_request(&self) {
        let profile = self
            .fleet
            .ev(&self.ev_id)
            .map(|ev| ChargingProfile {
                energy_amount_kwh: ev.required_energy_kwh(),
                target_soc: ev.target_soc,
            })
            .unwrap_or(ChargingProfile {
                energy_amount_kwh: 20.0,
                target_soc: 80.0,
            });

        self.send(SessionMessage::ChargingStartRequest(ChargingStartRequest {
            session_id: self.session_id.clone(),
            ev_id: self.ev_id.clone(),
            evse_id: self.evse_id,
            charging_profile: profile,
        }));
    }

    pub fn send_charging_stop_request(&self, reason: impl Into<String>) {
        self.send(SessionMessage::ChargingStopRequest(ChargingStopRequest {
            session_id: self.session_id.clone(),
            ev_id: self.ev_id.clone(),
            evse_id: self.evse_id,
            reason: reason.into(),
        }));
    }

    /// Step the vehicle's state of charge until full, then send exactly
    /// one stop request and exit.
    pub async fn monitor_soc(self: Arc<Self>) {
        loop {
            tokio::time::sleep(self.config.soc_interval).await;

            let soc = self.fleet.with_ev_mut(&self.ev_id, |ev| {
                ev.current_soc = (ev.current_soc + self.config.soc_step).min(100.0);
                ev.current_soc
            });

            let soc = match soc {
                Some(soc) => soc,
                None => {
                    warn!(ev_id = %self.ev_id, "no fleet record, SOC monitor stopping");
                    return;
                }
            };

            debug!(ev_id = %self.ev_id, soc, "simulated SOC");

            if soc >= 100.0 {
                info!(ev_id = %self.ev_id, "battery full, requesting stop");
                self.send_charging_stop_request("FullyCharged");
                return;
            }
        }
    }

    /// Act on commands from the registry until the channel closes.
    pub async fn run_commands(self: Arc<Self>, mut commands: mpsc::UnboundedReceiver<EvCommand>) {
        while let Some(command) = commands.recv().await {
            match command {
                EvCommand::StartCharging => {
                    debug!(ev_id = %self.ev_id, "start charging command");
                    self.send_charging_start_request();
                }
                EvCommand::StopCharging { reason } => {
                    debug!(ev_id = %self.ev_id, %reason, "stop charging command");
                    self.send_charging_stop_request(reason);
                }
            }
        }
        debug!(ev_id = %self.ev_id, "command channel closed");
    }

    /// Connect to the EVSE's session server and run until the connection
    /// drops. Registers the vehicle's command channel for its lifetime.
    pub async fn run(self: Arc<Self>, registry: SessionRegistry) -> Result<(), SessionError> {
        let port = iso15118_port_for(self.network.iso15118_base_port, self.evse_id);
        let url = format!("ws://{}:{}/iso15118", self.network.csms_host, port);

        let (ws_stream, _) = connect_async(&url).await.map_err(|e| {
            error!(ev_id = %self.ev_id, %url, error = %e, "session connect failed");
            SessionError::ConnectionClosed
        })?;
        info!(ev_id = %self.ev_id, %url, "session established");

        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Envelope>();
        self.attach_outgoing(out_tx);

        let ev_id = self.ev_id.clone();
        let sender = tokio::spawn(async move {
            while let Some(envelope) = out_rx.recv().await {
                let text = match envelope.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        error!(ev_id = %ev_id, error = %e, "serialize failed");
                        continue;
                    }
                };
                if let Err(e) = ws_tx.send(Message::Text(text)).await {
                    error!(ev_id = %ev_id, error = %e, "send failed");
                    break;
                }
            }
        });

        self.send_connection_request();
        self.send_ev_information_request();

        tokio::spawn(Arc::clone(&self).monitor_soc());

        let commands = registry.register_ev(&self.ev_id);
        tokio::spawn(Arc::clone(&self).run_commands(commands));

        while let Some(msg) = ws_rx.next().await {
            match msg {
                Ok(Message::Text(text)) => match Envelope::from_json(&text) {
                    Ok(envelope) => {
                        info!(
                            ev_id = %self.ev_id,
                            message_type = envelope.message.type_name(),
                            "station replied"
                        );
                    }
                    Err(e) => warn!(ev_id = %self.ev_id, error = %e, "unusable reply"),
                },
                Ok(Message::Close(_)) => {
                    info!(ev_id = %self.ev_id, "station closed the session");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    error!(ev_id = %self.ev_id, error = %e, "WebSocket error");
                    break;
                }
            }
        }

        registry.remove_ev(&self.ev_id);
        self.detach_outgoing();
        sender.abort();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use voltgrid_core::model::EvRecord;

    fn test_client(soc: f64, step: f64) -> (Arc<EvClient>, mpsc::UnboundedReceiver<Envelope>) {
        let fleet = FleetState::new();
        fleet.add_ev(EvRecord::new("EV-001", "Tesla", "Model 3", 60.0, 0.15).with_soc(soc, 80.0));

        let config = EvConfig::default()
            .with_soc_step(step)
            .with_soc_interval(Duration::from_millis(1));
        let client = EvClient::new("EV-001", 3, fleet, config, NetworkConfig::default());

        let (tx, rx) = mpsc::unbounded_channel();
        client.attach_outgoing(tx);
        (client, rx)
    }

    #[tokio::test]
    async fn test_soc_monitor_sends_one_stop() {
        let (client, mut rx) = test_client(90.0, 5.0);

        Arc::clone(&client).monitor_soc().await;

        let mut stops = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            if let SessionMessage::ChargingStopRequest(req) = envelope.message {
                stops.push(req.reason);
            }
        }
        assert_eq!(stops, vec!["FullyCharged".to_string()]);

        // The record is capped at 100.
        assert_eq!(client.fleet.ev("EV-001").unwrap().current_soc, 100.0);
    }

    #[tokio::test]
    async fn test_soc_never_exceeds_hundred() {
        let (client, _rx) = test_client(97.0, 5.0);
        Arc::clone(&client).monitor_soc().await;
        assert_eq!(client.fleet.ev("EV-001").unwrap().current_soc, 100.0);
    }

    #[test]
    fn test_start_request_uses_fleet_demand() {
        let (client, mut rx) = test_client(35.0, 5.0);

        client.send_charging_start_request();

        match rx.try_recv().unwrap().message {
            SessionMessage::ChargingStartRequest(req) => {
                assert_eq!(req.ev_id, "EV-001");
                assert_eq!(req.evse_id, 3);
                assert_eq!(req.charging_profile.target_soc, 80.0);
                // (80 - 35)% of 60 kWh
                assert!((req.charging_profile.energy_amount_kwh - 27.0).abs() < 1e-9);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_send_without_session_is_noop() {
        let fleet = FleetState::new();
        let client = EvClient::new(
            "EV-001",
            3,
            fleet,
            EvConfig::default(),
            NetworkConfig::default(),
        );
        client.send_charging_stop_request("UserStopped");
    }

    #[tokio::test]
    async fn test_commands_translate_to_requests() {
        let (client, mut rx) = test_client(35.0, 5.0);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(Arc::clone(&client).run_commands(cmd_rx));
        cmd_tx.send(EvCommand::StartCharging).unwrap();
        cmd_tx
            .send(EvCommand::StopCharging {
                reason: "UserStopped".into(),
            })
            .unwrap();
        drop(cmd_tx);
        task.await.unwrap();

        let first = rx.try_recv().unwrap().message;
        assert!(matches!(first, SessionMessage::ChargingStartRequest(_)));
        match rx.try_recv().unwrap().message {
            SessionMessage::ChargingStopRequest(req) => assert_eq!(req.reason, "UserStopped"),
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
