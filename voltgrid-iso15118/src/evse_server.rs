//! EVSE-side session server
//!
//! Each EVSE runs one `EvseServer` listening on `iso15118_base_port +
//! evse_id`. A vehicle connects, opens a session, and drives charging;
//! start and stop requests are answered on the session first and then
//! forwarded to the EVSE's Charge Point through the [`SessionRegistry`],
//! which turns them into OCPP transaction events.

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use voltgrid_core::config::NetworkConfig;
use voltgrid_core::ident::{iso15118_port_for, station_id_for};
use voltgrid_core::registry::{SessionRegistry, StationCommand};

use crate::messages::*;

/// What a handled request asks the OCPP side to do, after the session
/// reply has gone out.
#[derive(Debug, PartialEq, Eq)]
pub enum Forward {
    Start { evse_id: u32 },
    Stop { evse_id: u32, reason: String },
}

/// Session lifecycle of one vehicle connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionPhase {
    Idle,
    Connected,
    InfoExchanged,
    Charging,
}

/// Per-connection message handler. Pure over its inputs apart from the
/// registry forward, so tests can drive it without sockets.
pub struct ConnectionHandler {
    evse_id: u32,
    registry: SessionRegistry,
    phase: ConnectionPhase,
}

impl ConnectionHandler {
    pub fn new(evse_id: u32, registry: SessionRegistry) -> Self {
        Self {
            evse_id,
            registry,
            phase: ConnectionPhase::Idle,
        }
    }

    /// Handle one inbound message: the reply to send (if any) and the
    /// command to forward after the reply is on the wire.
    pub fn handle(&mut self, message: SessionMessage) -> Option<(SessionMessage, Option<Forward>)> {
        match message {
            SessionMessage::ConnectionRequest(req) => {
                info!(
                    evse_id = self.evse_id,
                    ev_id = %req.ev_id,
                    session_id = %req.session_id,
                    "vehicle connected"
                );
                self.phase = ConnectionPhase::Connected;
                Some((
                    SessionMessage::ConnectionResponse(ConnectionResponse {
                        status: SessionStatus::Accepted,
                    }),
                    None,
                ))
            }

            SessionMessage::EvInformationRequest(_) => {
                self.phase = ConnectionPhase::InfoExchanged;
                // Fixed demonstration values; a real station would read
                // these off the cable negotiation.
                Some((
                    SessionMessage::EvInformationResponse(EvInformationResponse {
                        battery_capacity: 60.0,
                        current_soc: 35.0,
                        target_soc: 80.0,
                        charging_power: 22.0,
                    }),
                    None,
                ))
            }

            SessionMessage::ChargingStartRequest(req) => {
                info!(
                    evse_id = self.evse_id,
                    ev_id = %req.ev_id,
                    energy_kwh = req.charging_profile.energy_amount_kwh,
                    target_soc = req.charging_profile.target_soc,
                    "charging start requested"
                );
                if self.phase == ConnectionPhase::Idle {
                    warn!(
                        evse_id = self.evse_id,
                        "start request before any connection request"
                    );
                }
                self.phase = ConnectionPhase::Charging;
                Some((
                    SessionMessage::ChargingStartResponse(ChargingStartResponse {
                        session_id: req.session_id,
                        status: SessionStatus::Accepted,
                        timestamp: Utc::now(),
                    }),
                    Some(Forward::Start {
                        evse_id: req.evse_id,
                    }),
                ))
            }

            SessionMessage::ChargingStopRequest(req) => {
                info!(
                    evse_id = self.evse_id,
                    ev_id = %req.ev_id,
                    reason = %req.reason,
                    "charging stop requested"
                );
                self.phase = ConnectionPhase::InfoExchanged;
                Some((
                    SessionMessage::ChargingStopResponse(ChargingStopResponse {
                        session_id: req.session_id,
                        status: SessionStatus::Stopped,
                        timestamp: Utc::now(),
                    }),
                    Some(Forward::Stop {
                        evse_id: req.evse_id,
                        reason: req.reason,
                    }),
                ))
            }

            SessionMessage::ChargingStatusUpdate(update) => {
                debug!(
                    evse_id = self.evse_id,
                    session_id = %update.session_id,
                    soc = update.current_soc,
                    power_kw = update.power_kw,
                    "charging status update"
                );
                None
            }

            SessionMessage::ChargingCompleteNotification(done) => {
                info!(
                    evse_id = self.evse_id,
                    session_id = %done.session_id,
                    final_soc = done.final_soc,
                    "charging complete"
                );
                None
            }

            SessionMessage::DisconnectionRequest(req) => {
                info!(
                    evse_id = self.evse_id,
                    ev_id = %req.ev_id,
                    "vehicle disconnecting"
                );
                self.phase = ConnectionPhase::Idle;
                Some((
                    SessionMessage::DisconnectionResponse(DisconnectionResponse {
                        session_id: req.session_id,
                        status: SessionStatus::Accepted,
                    }),
                    None,
                ))
            }

            // Responses travel EVSE -> EV, never the other way.
            other => {
                warn!(
                    evse_id = self.evse_id,
                    message_type = other.type_name(),
                    "unexpected message from vehicle"
                );
                None
            }
        }
    }

    /// Hand a command to the Charge Point the request named. The target
    /// comes from the payload's `evse_id`, not this listener's, so a
    /// session can drive any station. A missing station is a warning;
    /// the session side already answered the vehicle.
    pub fn forward(&self, forward: Forward) {
        let (evse_id, command) = match forward {
            Forward::Start { evse_id } => {
                (evse_id, StationCommand::StartTransaction { evse_id })
            }
            Forward::Stop { evse_id, reason } => {
                (evse_id, StationCommand::StopTransaction { evse_id, reason })
            }
        };
        let station_id = station_id_for(evse_id);

        match self.registry.station(&station_id) {
            Ok(tx) => {
                if tx.send(command).is_err() {
                    warn!(station = %station_id, "station command loop gone");
                }
            }
            Err(e) => warn!(station = %station_id, error = %e, "cannot forward to station"),
        }
    }
}

/// Listener for one EVSE's vehicle sessions
pub struct EvseServer {
    evse_id: u32,
    port: u16,
    registry: SessionRegistry,
}

impl EvseServer {
    pub fn new(evse_id: u32, network: &NetworkConfig, registry: SessionRegistry) -> Self {
        Self {
            evse_id,
            port: iso15118_port_for(network.iso15118_base_port, evse_id),
            registry,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Accept vehicle connections forever.
    pub async fn serve(&self) -> Result<(), SessionError> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr).await?;
        info!(evse_id = self.evse_id, %addr, "EVSE session server listening");

        loop {
            let (stream, peer) = listener.accept().await?;
            debug!(evse_id = self.evse_id, %peer, "vehicle connecting");

            let handler = ConnectionHandler::new(self.evse_id, self.registry.clone());
            tokio::spawn(async move {
                if let Err(e) = run_connection(handler, stream).await {
                    warn!(%peer, error = %e, "vehicle session ended with error");
                }
            });
        }
    }
}

async fn run_connection(
    mut handler: ConnectionHandler,
    stream: TcpStream,
) -> Result<(), SessionError> {
    let ws_stream = accept_async(stream)
        .await
        .map_err(|_| SessionError::ConnectionClosed)?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let envelope = match Envelope::from_json(&text) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        // One bad message does not end the session.
                        warn!(error = %e, "unusable session message");
                        continue;
                    }
                };

                debug!(message_type = envelope.message.type_name(), "received");

                if let Some((reply, forward)) = handler.handle(envelope.message) {
                    let text = Envelope::new(reply).to_json()?;
                    if ws_tx.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                    // The vehicle hears the answer before the OCPP side
                    // starts moving.
                    if let Some(forward) = forward {
                        handler.forward(forward);
                    }
                }
            }
            Ok(Message::Close(_)) => {
                info!("vehicle closed the session");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "WebSocket error");
                break;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start_request() -> SessionMessage {
        SessionMessage::ChargingStartRequest(ChargingStartRequest {
            session_id: "s-1".into(),
            ev_id: "EV-001".into(),
            evse_id: 3,
            charging_profile: ChargingProfile {
                energy_amount_kwh: 27.0,
                target_soc: 80.0,
            },
        })
    }

    #[test]
    fn test_connection_request_accepted() {
        let mut handler = ConnectionHandler::new(3, SessionRegistry::new());

        let (reply, forward) = handler
            .handle(SessionMessage::ConnectionRequest(ConnectionRequest {
                ev_id: "EV-001".into(),
                evse_id: 3,
                session_id: "s-1".into(),
                protocol_version: "1.0".into(),
            }))
            .unwrap();

        assert!(forward.is_none());
        match reply {
            SessionMessage::ConnectionResponse(resp) => {
                assert_eq!(resp.status, SessionStatus::Accepted)
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[test]
    fn test_information_response_is_synthetic() {
        let mut handler = ConnectionHandler::new(3, SessionRegistry::new());

        let (reply, _) = handler
            .handle(SessionMessage::EvInformationRequest(EvInformationRequest {
                session_id: "s-1".into(),
            }))
            .unwrap();

        match reply {
            SessionMessage::EvInformationResponse(info) => {
                assert_eq!(info.battery_capacity, 60.0);
                assert_eq!(info.current_soc, 35.0);
                assert_eq!(info.target_soc, 80.0);
                assert_eq!(info.charging_power, 22.0);
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[test]
    fn test_start_replies_then_forwards() {
        let mut handler = ConnectionHandler::new(3, SessionRegistry::new());

        let (reply, forward) = handler.handle(start_request()).unwrap();
        match reply {
            SessionMessage::ChargingStartResponse(resp) => {
                assert_eq!(resp.status, SessionStatus::Accepted);
                assert_eq!(resp.session_id, "s-1");
            }
            other => panic!("unexpected reply: {:?}", other),
        }
        assert_eq!(forward, Some(Forward::Start { evse_id: 3 }));
    }

    #[test]
    fn test_forward_targets_payload_evse_id() {
        // The listener's own id does not matter; the payload names the
        // station the command is for.
        let mut handler = ConnectionHandler::new(3, SessionRegistry::new());

        let (_, forward) = handler
            .handle(SessionMessage::ChargingStartRequest(ChargingStartRequest {
                session_id: "s-1".into(),
                ev_id: "EV-001".into(),
                evse_id: 5,
                charging_profile: ChargingProfile {
                    energy_amount_kwh: 27.0,
                    target_soc: 80.0,
                },
            }))
            .unwrap();

        assert_eq!(forward, Some(Forward::Start { evse_id: 5 }));
    }

    #[test]
    fn test_stop_carries_reason() {
        let mut handler = ConnectionHandler::new(3, SessionRegistry::new());

        let (reply, forward) = handler
            .handle(SessionMessage::ChargingStopRequest(ChargingStopRequest {
                session_id: "s-1".into(),
                ev_id: "EV-001".into(),
                evse_id: 3,
                reason: "FullyCharged".into(),
            }))
            .unwrap();

        match reply {
            SessionMessage::ChargingStopResponse(resp) => {
                assert_eq!(resp.status, SessionStatus::Stopped)
            }
            other => panic!("unexpected reply: {:?}", other),
        }
        assert_eq!(
            forward,
            Some(Forward::Stop {
                evse_id: 3,
                reason: "FullyCharged".into()
            })
        );
    }

    #[tokio::test]
    async fn test_forward_reaches_registered_station() {
        let registry = SessionRegistry::new();
        let mut commands = registry.register_station(station_id_for(5));

        // Listener 3 forwarding on behalf of a payload naming EVSE 5.
        let handler = ConnectionHandler::new(3, registry);
        handler.forward(Forward::Start { evse_id: 5 });
        handler.forward(Forward::Stop {
            evse_id: 5,
            reason: "FullyCharged".into(),
        });

        match commands.recv().await.unwrap() {
            StationCommand::StartTransaction { evse_id } => assert_eq!(evse_id, 5),
            other => panic!("unexpected command: {:?}", other),
        }
        match commands.recv().await.unwrap() {
            StationCommand::StopTransaction { evse_id, reason } => {
                assert_eq!(evse_id, 5);
                assert_eq!(reason, "FullyCharged");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_forward_without_station_is_harmless() {
        let handler = ConnectionHandler::new(7, SessionRegistry::new());
        handler.forward(Forward::Start { evse_id: 7 });
    }

    #[test]
    fn test_response_from_vehicle_ignored() {
        let mut handler = ConnectionHandler::new(3, SessionRegistry::new());
        let outcome = handler.handle(SessionMessage::ConnectionResponse(ConnectionResponse {
            status: SessionStatus::Accepted,
        }));
        assert!(outcome.is_none());
    }

    #[test]
    fn test_port_derivation() {
        let server = EvseServer::new(3, &NetworkConfig::default(), SessionRegistry::new());
        assert_eq!(server.port(), 9004);
    }
}
