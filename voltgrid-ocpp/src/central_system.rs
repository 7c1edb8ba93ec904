//! Central System (CSMS)
//!
//! WebSocket server at `0.0.0.0:{csms_port}`. The last path segment of a
//! connection URL is the station id; each connection gets its own task
//! that answers station CALLs against the shared [`FleetState`] and
//! relays Central-System-initiated calls (ReserveNow) onto the socket.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        http::HeaderValue,
        Message,
    },
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use voltgrid_core::config::NetworkConfig;
use voltgrid_core::fleet::FleetState;
use voltgrid_core::ident::{evse_id_from_station, station_id_for};
use voltgrid_core::ConnectorStatus;

use crate::messages::*;
use crate::types::*;

const OCPP_SUBPROTOCOL: &str = "ocpp2.0.1";

/// First reservation id ever issued
const RESERVATION_ID_BASE: i32 = 1000;

/// Central System failures surfaced to orchestration
#[derive(Debug, Error)]
pub enum CsmsError {
    #[error("station {0} not connected")]
    StationNotConnected(String),

    #[error(transparent)]
    Protocol(#[from] OcppError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A CALL on its way to a station, carrying the channel its CALLRESULT
/// comes back on.
#[derive(Debug)]
pub struct OutboundCall {
    pub call: Call,
    pub reply: oneshot::Sender<Result<CallResult, OcppError>>,
}

#[derive(Debug, Clone)]
struct StationLink {
    calls: mpsc::UnboundedSender<OutboundCall>,
}

/// The Central System: one per process, shared across connection tasks.
#[derive(Clone)]
pub struct CentralSystem {
    fleet: FleetState,
    network: NetworkConfig,
    links: Arc<parking_lot::RwLock<HashMap<String, StationLink>>>,
    reservation_counter: Arc<AtomicI32>,
}

impl CentralSystem {
    pub fn new(fleet: FleetState, network: NetworkConfig) -> Self {
        Self {
            fleet,
            network,
            links: Arc::new(parking_lot::RwLock::new(HashMap::new())),
            reservation_counter: Arc::new(AtomicI32::new(RESERVATION_ID_BASE)),
        }
    }

    /// Station ids with a live connection, sorted.
    pub fn connected_stations(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.links.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Accept station connections forever.
    pub async fn serve(&self) -> Result<(), CsmsError> {
        let addr = format!("0.0.0.0:{}", self.network.csms_port);
        let listener = TcpListener::bind(&addr).await?;
        info!(%addr, "Central System listening");

        loop {
            let (stream, peer) = listener.accept().await?;
            debug!(%peer, "incoming connection");

            let this = self.clone();
            tokio::spawn(async move {
                if let Err(e) = this.handle_connection(stream).await {
                    warn!(%peer, error = %e, "connection ended with error");
                }
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream) -> Result<(), CsmsError> {
        // The handshake callback is the only place the request URI is
        // visible, so the path is smuggled out through a slot.
        let path: Arc<parking_lot::Mutex<Option<String>>> =
            Arc::new(parking_lot::Mutex::new(None));
        let path_slot = Arc::clone(&path);

        let callback = move |req: &Request, mut resp: Response| -> Result<Response, ErrorResponse> {
            *path_slot.lock() = Some(req.uri().path().to_string());

            let offers_ocpp = req
                .headers()
                .get("Sec-WebSocket-Protocol")
                .and_then(|v| v.to_str().ok())
                .map(|v| v.split(',').any(|p| p.trim() == OCPP_SUBPROTOCOL))
                .unwrap_or(false);

            if offers_ocpp {
                resp.headers_mut().insert(
                    "Sec-WebSocket-Protocol",
                    HeaderValue::from_static(OCPP_SUBPROTOCOL),
                );
            }

            Ok(resp)
        };

        let ws_stream = accept_hdr_async(stream, callback)
            .await
            .map_err(|_| CsmsError::Protocol(OcppError::ConnectionClosed))?;

        let station_id = path
            .lock()
            .take()
            .unwrap_or_default()
            .trim_matches('/')
            .to_string();
        if station_id.is_empty() {
            warn!("connection without a station id in the path, dropping");
            return Ok(());
        }
        if evse_id_from_station(&station_id).is_none() {
            debug!(station = %station_id, "station id outside the CP_{{n}} convention");
        }

        info!(station = %station_id, "station connected");

        let (calls_tx, mut calls_rx) = mpsc::unbounded_channel::<OutboundCall>();
        self.links
            .write()
            .insert(station_id.clone(), StationLink { calls: calls_tx });

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let mut pending: HashMap<String, oneshot::Sender<Result<CallResult, OcppError>>> =
            HashMap::new();

        loop {
            tokio::select! {
                msg = ws_rx.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        debug!(station = %station_id, %text, "received");
                        match OcppMessage::parse(text.as_bytes()) {
                            Ok(OcppMessage::Call(call)) => {
                                let reply = self.handle_call(&station_id, &call);
                                let bytes = match reply.to_bytes() {
                                    Ok(b) => b,
                                    Err(e) => {
                                        error!(station = %station_id, error = %e, "serialize failed");
                                        continue;
                                    }
                                };
                                if ws_tx
                                    .send(Message::Text(String::from_utf8_lossy(&bytes).into_owned()))
                                    .await
                                    .is_err()
                                {
                                    break;
                                }
                            }
                            Ok(OcppMessage::CallResult(result)) => {
                                match pending.remove(&result.message_id) {
                                    Some(tx) => { let _ = tx.send(Ok(result)); }
                                    None => warn!(
                                        station = %station_id,
                                        message_id = %result.message_id,
                                        "CALLRESULT for unknown message id"
                                    ),
                                }
                            }
                            Ok(OcppMessage::CallError(err)) => {
                                if let Some(tx) = pending.remove(&err.message_id) {
                                    let _ = tx.send(Err(OcppError::RemoteError {
                                        code: err.error_code,
                                        description: err.error_description,
                                        details: err.error_details,
                                    }));
                                }
                            }
                            Err(e) => warn!(station = %station_id, error = %e, "unparseable message"),
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!(station = %station_id, "station closed the connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!(station = %station_id, error = %e, "WebSocket error");
                        break;
                    }
                    None => break,
                },

                outbound = calls_rx.recv() => match outbound {
                    Some(OutboundCall { call, reply }) => {
                        let bytes = match call.to_bytes() {
                            Ok(b) => b,
                            Err(e) => {
                                let _ = reply.send(Err(e));
                                continue;
                            }
                        };
                        pending.insert(call.message_id.clone(), reply);
                        if ws_tx
                            .send(Message::Text(String::from_utf8_lossy(&bytes).into_owned()))
                            .await
                            .is_err()
                        {
                            if let Some(tx) = pending.remove(&call.message_id) {
                                let _ = tx.send(Err(OcppError::ConnectionClosed));
                            }
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        self.links.write().remove(&station_id);
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(OcppError::ConnectionClosed));
        }
        info!(station = %station_id, "station disconnected");

        Ok(())
    }

    /// Answer one station CALL. Fleet lookups that miss are warnings, not
    /// protocol errors; only a malformed payload earns a CALLERROR.
    pub fn handle_call(&self, station_id: &str, call: &Call) -> OcppMessage {
        let result = match call.action {
            Action::BootNotification => self.on_boot_notification(station_id, call),
            Action::Authorize => self.on_authorize(station_id, call),
            Action::StatusNotification => self.on_status_notification(station_id, call),
            Action::Heartbeat => CallResult::heartbeat(call.message_id.clone()),
            Action::MeterValues => self.on_meter_values(station_id, call),
            Action::TransactionEvent => self.on_transaction_event(station_id, call),
            Action::ReserveNow => self.on_reserve_now(station_id, call),
        };

        match result {
            Ok(result) => OcppMessage::CallResult(result),
            Err(OcppError::JsonError(e)) => OcppMessage::CallError(CallError::new(
                call.message_id.clone(),
                ErrorCode::FormatViolation,
                e.to_string(),
            )),
            Err(e) => OcppMessage::CallError(CallError::new(
                call.message_id.clone(),
                ErrorCode::InternalError,
                e.to_string(),
            )),
        }
    }

    fn on_boot_notification(
        &self,
        station_id: &str,
        call: &Call,
    ) -> Result<CallResult, OcppError> {
        let req: BootNotificationRequest = call.parse_payload()?;
        info!(
            station = %station_id,
            vendor = %req.charging_station.vendor_name,
            model = %req.charging_station.model,
            "boot notification"
        );
        CallResult::boot_notification(
            call.message_id.clone(),
            self.network.heartbeat_interval.as_secs() as i32,
            RegistrationStatus::Accepted,
        )
    }

    fn on_authorize(&self, station_id: &str, call: &Call) -> Result<CallResult, OcppError> {
        let req: AuthorizeRequest = call.parse_payload()?;
        info!(
            station = %station_id,
            id_token = %req.id_token.id_token,
            "authorize request"
        );
        CallResult::authorize(call.message_id.clone(), AuthorizationStatus::Accepted)
    }

    fn on_status_notification(
        &self,
        station_id: &str,
        call: &Call,
    ) -> Result<CallResult, OcppError> {
        let req: StatusNotificationRequest = call.parse_payload()?;

        match req.connector_status.parse::<ConnectorStatus>() {
            Ok(status) => {
                let updated = self
                    .fleet
                    .with_evse_mut(req.evse_id, |evse| evse.status = status)
                    .is_some();
                if updated {
                    info!(
                        station = %station_id,
                        evse_id = req.evse_id,
                        %status,
                        "EVSE status updated"
                    );
                } else {
                    warn!(
                        station = %station_id,
                        evse_id = req.evse_id,
                        "status notification for unknown EVSE"
                    );
                }
            }
            Err(e) => warn!(station = %station_id, error = %e, "unusable connector status"),
        }

        CallResult::status_notification(call.message_id.clone())
    }

    fn on_meter_values(&self, station_id: &str, call: &Call) -> Result<CallResult, OcppError> {
        let req: MeterValuesRequest = call.parse_payload()?;
        let samples: usize = req.meter_value.iter().map(|mv| mv.sampled_value.len()).sum();
        info!(
            station = %station_id,
            evse_id = req.evse_id,
            samples,
            "meter values received"
        );
        CallResult::meter_values(call.message_id.clone())
    }

    fn on_transaction_event(
        &self,
        station_id: &str,
        call: &Call,
    ) -> Result<CallResult, OcppError> {
        let req: TransactionEventRequest = call.parse_payload()?;
        let evse_id = req.evse.as_ref().map(|e| e.id);
        let user_token = req.id_token.as_ref().map(|t| t.id_token.clone());

        info!(
            station = %station_id,
            event_type = ?req.event_type,
            transaction_id = %req.transaction_info.transaction_id,
            "transaction event"
        );

        let evse_id = match evse_id {
            Some(id) => id,
            None => {
                warn!(station = %station_id, "transaction event without an EVSE");
                return CallResult::transaction_event(call.message_id.clone());
            }
        };

        match req.event_type {
            TransactionEventType::Started => {
                if self
                    .fleet
                    .with_evse_mut(evse_id, |evse| evse.start_charging())
                    .is_none()
                {
                    warn!(station = %station_id, evse_id, "transaction event for unknown EVSE");
                } else {
                    // Associate the vehicle: the one already plugged into
                    // this EVSE, or failing that the one the token names.
                    let associated = self
                        .fleet
                        .with_connected_ev_mut(evse_id, |ev| ev.id.clone())
                        .or_else(|| {
                            user_token.as_deref().and_then(|token| {
                                self.fleet.with_ev_mut(token, |ev| {
                                    ev.connected_evse_id = Some(evse_id);
                                    ev.id.clone()
                                })
                            })
                        });
                    info!(station = %station_id, evse_id, ev = ?associated, "charging started");
                }
            }
            TransactionEventType::Ended => {
                if self
                    .fleet
                    .with_evse_mut(evse_id, |evse| evse.stop_charging())
                    .is_none()
                {
                    warn!(station = %station_id, evse_id, "transaction event for unknown EVSE");
                } else {
                    self.fleet
                        .with_connected_ev_mut(evse_id, |ev| ev.connected_evse_id = None);
                    info!(station = %station_id, evse_id, "charging ended");
                }
            }
            TransactionEventType::Updated => {
                debug!(station = %station_id, evse_id, "transaction update");
            }
        }

        CallResult::transaction_event(call.message_id.clone())
    }

    fn on_reserve_now(&self, station_id: &str, call: &Call) -> Result<CallResult, OcppError> {
        let req: ReserveNowRequest = call.parse_payload()?;

        let evse_id = match req.evse_id {
            Some(id) => id,
            None => {
                warn!(station = %station_id, "reservation without an EVSE id");
                return CallResult::reserve_now(
                    call.message_id.clone(),
                    ReservationStatus::Rejected,
                );
            }
        };

        // Availability check and reservation happen under one lock hold.
        let accepted = self
            .fleet
            .with_evse_mut(evse_id, |evse| {
                if evse.is_available() {
                    evse.reserve(req.id_token.id_token.clone());
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false);

        if accepted {
            info!(station = %station_id, evse_id, reservation_id = req.id, "EVSE reserved");
            CallResult::reserve_now(call.message_id.clone(), ReservationStatus::Accepted)
        } else {
            warn!(station = %station_id, evse_id, "reservation rejected");
            CallResult::reserve_now(call.message_id.clone(), ReservationStatus::Rejected)
        }
    }

    /// Reserve an EVSE on behalf of a vehicle by sending ReserveNow to its
    /// station. The fleet record flips to Reserved only when the station
    /// accepts.
    pub async fn reserve_evse_by_id(
        &self,
        evse_id: u32,
        ev_id: &str,
    ) -> Result<ReservationStatus, CsmsError> {
        let station_id = station_id_for(evse_id);
        let link = self
            .links
            .read()
            .get(&station_id)
            .cloned()
            .ok_or_else(|| CsmsError::StationNotConnected(station_id.clone()))?;

        let reservation_id = self.reservation_counter.fetch_add(1, Ordering::Relaxed);
        let call = Call::reserve_now(reservation_id, evse_id, IdToken::central(ev_id))
            .map_err(CsmsError::Protocol)?;

        let (reply_tx, reply_rx) = oneshot::channel();
        link.calls
            .send(OutboundCall {
                call,
                reply: reply_tx,
            })
            .map_err(|_| CsmsError::StationNotConnected(station_id.clone()))?;

        let result = reply_rx
            .await
            .map_err(|_| CsmsError::Protocol(OcppError::ConnectionClosed))??;
        let response: ReserveNowResponse = result.parse_payload().map_err(CsmsError::Protocol)?;

        info!(
            station = %station_id,
            reservation_id,
            status = ?response.status,
            "reservation answered"
        );

        if response.status == ReservationStatus::Accepted {
            if self
                .fleet
                .with_evse_mut(evse_id, |evse| evse.reserve(ev_id))
                .is_none()
            {
                warn!(evse_id, "accepted reservation for EVSE with no fleet record");
            }
        }

        Ok(response.status)
    }

    /// Register a station link without a socket. Lets tests and in-process
    /// harnesses stand in for a connected station.
    pub fn register_link(&self, station_id: &str) -> mpsc::UnboundedReceiver<OutboundCall> {
        let (calls_tx, calls_rx) = mpsc::unbounded_channel();
        self.links
            .write()
            .insert(station_id.to_string(), StationLink { calls: calls_tx });
        calls_rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use voltgrid_core::model::{EvRecord, EvseRecord};

    fn test_system() -> CentralSystem {
        let fleet = FleetState::new();
        fleet.add_evse(EvseRecord::new(1, "Downtown A"));
        fleet.add_evse(EvseRecord::new(2, "Downtown B").with_status(ConnectorStatus::Occupied));
        fleet.add_ev(EvRecord::new("EV-001", "Tesla", "Model 3", 60.0, 0.15));
        CentralSystem::new(fleet, NetworkConfig::default())
    }

    fn expect_result(msg: OcppMessage) -> CallResult {
        match msg {
            OcppMessage::CallResult(result) => result,
            other => panic!("expected CALLRESULT, got {:?}", other),
        }
    }

    #[test]
    fn test_boot_grants_heartbeat_interval() {
        let csms = test_system();
        let call = Call::boot_notification(
            ChargingStationInfo {
                model: "VG-EVSE".into(),
                vendor_name: "Voltgrid".into(),
            },
            BootReason::PowerUp,
        )
        .unwrap();

        let result = expect_result(csms.handle_call("CP_1", &call));
        let response: BootNotificationResponse = result.parse_payload().unwrap();
        assert_eq!(response.status, RegistrationStatus::Accepted);
        assert_eq!(response.interval, 10);
    }

    #[test]
    fn test_status_notification_updates_fleet() {
        let csms = test_system();
        let call = Call::status_notification(1, 1, ConnectorStatus::Faulted).unwrap();

        expect_result(csms.handle_call("CP_1", &call));
        assert_eq!(csms.fleet.evse(1).unwrap().status, ConnectorStatus::Faulted);
    }

    #[test]
    fn test_status_notification_unknown_evse_still_acked() {
        let csms = test_system();
        let call = Call::status_notification(99, 1, ConnectorStatus::Faulted).unwrap();
        expect_result(csms.handle_call("CP_99", &call));

        // No record grew and none changed.
        assert!(csms.fleet.evse(99).is_none());
        assert_eq!(
            csms.fleet.evse(1).unwrap().status,
            ConnectorStatus::Available
        );
        assert_eq!(
            csms.fleet.evse(2).unwrap().status,
            ConnectorStatus::Occupied
        );
    }

    #[test]
    fn test_status_notification_bad_status_still_acked() {
        let csms = test_system();
        let call = Call::new(
            Action::StatusNotification,
            serde_json::json!({
                "timestamp": "2026-02-01T10:00:00Z",
                "connectorStatus": "Levitating",
                "evseId": 1,
                "connectorId": 1
            }),
        )
        .unwrap();

        expect_result(csms.handle_call("CP_1", &call));
        // The record keeps its previous status.
        assert_eq!(
            csms.fleet.evse(1).unwrap().status,
            ConnectorStatus::Available
        );
    }

    #[test]
    fn test_reserve_now_accepts_only_available() {
        let csms = test_system();

        let call = Call::reserve_now(1000, 1, IdToken::central("EV-001")).unwrap();
        let result = expect_result(csms.handle_call("CP_1", &call));
        let response: ReserveNowResponse = result.parse_payload().unwrap();
        assert_eq!(response.status, ReservationStatus::Accepted);
        assert_eq!(csms.fleet.evse(1).unwrap().status, ConnectorStatus::Reserved);

        // EVSE 2 is Occupied
        let call = Call::reserve_now(1001, 2, IdToken::central("EV-001")).unwrap();
        let result = expect_result(csms.handle_call("CP_2", &call));
        let response: ReserveNowResponse = result.parse_payload().unwrap();
        assert_eq!(response.status, ReservationStatus::Rejected);
        assert_eq!(csms.fleet.evse(2).unwrap().status, ConnectorStatus::Occupied);
    }

    #[test]
    fn test_transaction_event_started_and_ended() {
        let csms = test_system();
        csms.fleet
            .with_ev_mut("EV-001", |ev| ev.connected_evse_id = Some(1));

        let started = TransactionEventRequest {
            event_type: TransactionEventType::Started,
            timestamp: Utc::now(),
            trigger_reason: TriggerReason::Authorized,
            seq_no: 1,
            transaction_info: TransactionInfo {
                transaction_id: "tx-CP_1-20260201100000".into(),
                stopped_reason: None,
                charging_state: None,
            },
            meter_value: None,
            offline: Some(false),
            evse: Some(Evse {
                id: 1,
                connector_id: None,
            }),
            id_token: Some(IdToken::central("voltgrid-user")),
        };
        expect_result(csms.handle_call("CP_1", &Call::transaction_event(started).unwrap()));

        let evse = csms.fleet.evse(1).unwrap();
        assert_eq!(evse.status, ConnectorStatus::Occupied);
        assert!(evse.charging_start_time.is_some());

        let ended = TransactionEventRequest {
            event_type: TransactionEventType::Ended,
            timestamp: Utc::now(),
            trigger_reason: TriggerReason::StopAuthorized,
            seq_no: 2,
            transaction_info: TransactionInfo {
                transaction_id: "tx-CP_1-20260201100000".into(),
                stopped_reason: Some(StoppedReason::EVDisconnected),
                charging_state: Some(ChargingState::Idle),
            },
            meter_value: None,
            offline: Some(false),
            evse: Some(Evse {
                id: 1,
                connector_id: None,
            }),
            id_token: Some(IdToken::central("voltgrid-user")),
        };
        expect_result(csms.handle_call("CP_1", &Call::transaction_event(ended).unwrap()));

        let evse = csms.fleet.evse(1).unwrap();
        assert_eq!(evse.status, ConnectorStatus::Available);
        assert!(evse.charging_start_time.is_none());
        assert_eq!(csms.fleet.ev("EV-001").unwrap().connected_evse_id, None);
    }

    #[test]
    fn test_malformed_payload_gets_call_error() {
        let csms = test_system();
        let call = Call::new(Action::BootNotification, serde_json::json!({"bogus": true})).unwrap();

        match csms.handle_call("CP_1", &call) {
            OcppMessage::CallError(err) => {
                assert_eq!(err.error_code, ErrorCode::FormatViolation);
            }
            other => panic!("expected CALLERROR, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reserve_by_id_requires_connected_station() {
        let csms = test_system();
        match csms.reserve_evse_by_id(1, "EV-001").await {
            Err(CsmsError::StationNotConnected(id)) => assert_eq!(id, "CP_1"),
            other => panic!("unexpected outcome: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_reserve_by_id_counter_and_fleet_update() {
        let csms = test_system();
        let mut link_rx = csms.register_link("CP_1");

        let seen_ids = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen = Arc::clone(&seen_ids);

        // Station-side stand-in: accept the first reservation, reject the
        // second.
        tokio::spawn(async move {
            let mut accept = true;
            while let Some(outbound) = link_rx.recv().await {
                let status = if accept {
                    ReservationStatus::Accepted
                } else {
                    ReservationStatus::Rejected
                };
                accept = false;

                if let Ok(req) = outbound.call.parse_payload::<ReserveNowRequest>() {
                    seen.lock().push(req.id);
                }

                let result =
                    CallResult::reserve_now(outbound.call.message_id.clone(), status).unwrap();
                let _ = outbound.reply.send(Ok(result));
            }
        });

        let status = csms.reserve_evse_by_id(1, "EV-001").await.unwrap();
        assert_eq!(status, ReservationStatus::Accepted);
        let evse = csms.fleet.evse(1).unwrap();
        assert_eq!(evse.status, ConnectorStatus::Reserved);
        assert_eq!(evse.current_ev_id.as_deref(), Some("EV-001"));

        // The rejection leaves the record alone.
        csms.fleet
            .with_evse_mut(1, |evse| evse.status = ConnectorStatus::Available);
        let status = csms.reserve_evse_by_id(1, "EV-001").await.unwrap();
        assert_eq!(status, ReservationStatus::Rejected);
        assert_eq!(
            csms.fleet.evse(1).unwrap().status,
            ConnectorStatus::Available
        );

        // Reservation ids come from the monotonic counter.
        assert_eq!(*seen_ids.lock(), vec![1000, 1001]);
    }
}
