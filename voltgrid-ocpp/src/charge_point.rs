//! Charge Point (station side of the OCPP link)
//!
//! Each simulated EVSE runs one `ChargePoint`. It connects to the Central
//! System over WebSocket with the `ocpp2.0.1` subprotocol, performs the
//! boot sequence (BootNotification, Authorize, initial StatusNotification),
//! keeps a heartbeat running, and drives transactions with their periodic
//! meter samples. Commands arriving from the ISO15118 side are consumed by
//! [`ChargePoint::run_commands`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{
        handshake::client::Request,
        http::{header, Uri},
        protocol::WebSocketConfig,
        Message,
    },
};
use tracing::{debug, error, info, warn};

use voltgrid_core::config::{NetworkConfig, StationConfig};
use voltgrid_core::ident::station_id_for;
use voltgrid_core::registry::{SessionRegistry, StationCommand};
use voltgrid_core::ConnectorStatus;

use crate::messages::*;
use crate::types::*;

/// OCPP 2.0.1 WebSocket subprotocol
const OCPP_SUBPROTOCOL: &str = "ocpp2.0.1";

/// Active-transaction bookkeeping, guarded by an async mutex so a stop
/// can await the meter task's handle without blocking the runtime.
#[derive(Default)]
struct TransactionSlot {
    transaction_id: Option<String>,
    meter_stop: Option<watch::Sender<bool>>,
    meter_task: Option<JoinHandle<()>>,
}

/// Station side of one OCPP connection
pub struct ChargePoint {
    evse_id: u32,
    station_id: String,
    station: StationConfig,
    network: NetworkConfig,

    /// Messages bound for the WebSocket; the bridge task in [`run`] drains
    /// this, and tests drain it directly.
    outgoing: mpsc::UnboundedSender<OcppMessage>,
    pending: parking_lot::Mutex<HashMap<String, oneshot::Sender<Result<CallResult, OcppError>>>>,
    transaction: tokio::sync::Mutex<TransactionSlot>,
}

impl ChargePoint {
    /// Create a Charge Point for an EVSE, returning the receiving end of
    /// its outgoing message stream.
    pub fn new(
        evse_id: u32,
        station: StationConfig,
        network: NetworkConfig,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<OcppMessage>) {
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let cp = Arc::new(Self {
            evse_id,
            station_id: station_id_for(evse_id),
            station,
            network,
            outgoing,
            pending: parking_lot::Mutex::new(HashMap::new()),
            transaction: tokio::sync::Mutex::new(TransactionSlot::default()),
        });
        (cp, outgoing_rx)
    }

    pub fn evse_id(&self) -> u32 {
        self.evse_id
    }

    pub fn station_id(&self) -> &str {
        &self.station_id
    }

    /// Send a CALL and wait for the matching CALLRESULT.
    ///
    /// There is no timeout: if the peer never answers, the caller stays
    /// suspended until the connection drops and the pending map is drained.
    pub async fn call(&self, call: Call) -> Result<CallResult, OcppError> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(call.message_id.clone(), tx);

        self.outgoing
            .send(OcppMessage::Call(call))
            .map_err(|_| OcppError::ConnectionClosed)?;

        rx.await.map_err(|_| OcppError::ConnectionClosed)?
    }

    /// Route one message from the Central System.
    ///
    /// Responses resolve their pending call; requests are answered inline.
    /// The only request a station accepts is ReserveNow, which it always
    /// grants. Anything else gets a NotImplemented CALLERROR.
    pub fn handle_incoming(&self, msg: OcppMessage) {
        match msg {
            OcppMessage::CallResult(result) => {
                if let Some(tx) = self.pending.lock().remove(&result.message_id) {
                    let _ = tx.send(Ok(result));
                } else {
                    warn!(
                        station = %self.station_id,
                        message_id = %result.message_id,
                        "CALLRESULT for unknown message id"
                    );
                }
            }
            OcppMessage::CallError(err) => {
                if let Some(tx) = self.pending.lock().remove(&err.message_id) {
                    let _ = tx.send(Err(OcppError::RemoteError {
                        code: err.error_code,
                        description: err.error_description,
                        details: err.error_details,
                    }));
                }
            }
            OcppMessage::Call(call) => {
                let reply = self.answer_call(&call);
                if self.outgoing.send(reply).is_err() {
                    warn!(station = %self.station_id, "outgoing channel closed, dropping reply");
                }
            }
        }
    }

    fn answer_call(&self, call: &Call) -> OcppMessage {
        match call.action {
            Action::ReserveNow => {
                match call.parse_payload::<ReserveNowRequest>() {
                    Ok(req) => {
                        info!(
                            station = %self.station_id,
                            reservation_id = req.id,
                            id_token = %req.id_token.id_token,
                            "reservation accepted"
                        );
                        match CallResult::reserve_now(
                            call.message_id.clone(),
                            ReservationStatus::Accepted,
                        ) {
                            Ok(result) => OcppMessage::CallResult(result),
                            Err(e) => OcppMessage::CallError(CallError::new(
                                call.message_id.clone(),
                                ErrorCode::InternalError,
                                e.to_string(),
                            )),
                        }
                    }
                    Err(e) => OcppMessage::CallError(CallError::new(
                        call.message_id.clone(),
                        ErrorCode::FormatViolation,
                        e.to_string(),
                    )),
                }
            }
            _ => OcppMessage::CallError(CallError::new(
                call.message_id.clone(),
                ErrorCode::NotImplemented,
                format!("{} not handled by stations", call.action),
            )),
        }
    }

    /// Boot sequence: BootNotification, then on acceptance Authorize and
    /// the initial StatusNotification. Returns the granted heartbeat
    /// interval when accepted.
    pub async fn send_boot_notification(&self) -> Result<Option<i32>, OcppError> {
        let call = Call::boot_notification(
            ChargingStationInfo {
                model: self.station.model.clone(),
                vendor_name: self.station.vendor.clone(),
            },
            BootReason::PowerUp,
        )?;

        let result = self.call(call).await?;
        let response: BootNotificationResponse = result.parse_payload()?;

        match response.status {
            RegistrationStatus::Accepted => {
                info!(
                    station = %self.station_id,
                    interval = response.interval,
                    "boot accepted"
                );

                self.send_authorize().await?;
                self.send_status_notification(self.station.initial_status)
                    .await?;

                Ok(Some(response.interval))
            }
            status => {
                warn!(station = %self.station_id, ?status, "boot not accepted");
                Ok(None)
            }
        }
    }

    async fn send_authorize(&self) -> Result<(), OcppError> {
        let call = Call::authorize(IdToken::central(self.station.id_token.clone()))?;
        let result = self.call(call).await?;
        let response: AuthorizeResponse = result.parse_payload()?;
        info!(
            station = %self.station_id,
            status = ?response.id_token_info.status,
            "authorize answered"
        );
        Ok(())
    }

    /// Report a connector status; the acknowledgement carries no content.
    pub async fn send_status_notification(&self, status: ConnectorStatus) -> Result<(), OcppError> {
        let call = Call::status_notification(self.evse_id, 1, status)?;
        self.call(call).await?;
        info!(station = %self.station_id, %status, "status notification sent");
        Ok(())
    }

    /// Simulated cable plug-in: the connector goes Occupied.
    pub async fn plug_in_vehicle(&self) -> Result<(), OcppError> {
        self.send_status_notification(ConnectorStatus::Occupied).await
    }

    /// Begin a transaction: send the Started event and spawn the periodic
    /// meter task. Returns the generated transaction id, or `None` when a
    /// transaction is already running.
    pub async fn send_transaction_event_started(
        self: Arc<Self>,
    ) -> Result<Option<String>, OcppError> {
        let mut slot = self.transaction.lock().await;
        if slot.transaction_id.is_some() {
            warn!(station = %self.station_id, "transaction already active, ignoring start");
            return Ok(None);
        }

        let timestamp = Utc::now();
        let transaction_id = format!(
            "tx-{}-{}",
            self.station_id,
            timestamp.format("%Y%m%d%H%M%S")
        );

        let request = TransactionEventRequest {
            event_type: TransactionEventType::Started,
            timestamp,
            trigger_reason: TriggerReason::Authorized,
            seq_no: 1,
            transaction_info: TransactionInfo {
                transaction_id: transaction_id.clone(),
                stopped_reason: None,
                charging_state: None,
            },
            meter_value: Some(vec![MeterValue {
                timestamp,
                sampled_value: vec![SampledValue::energy_wh(0.0)],
            }]),
            offline: Some(false),
            evse: Some(Evse {
                id: self.evse_id,
                connector_id: None,
            }),
            id_token: Some(IdToken::central(self.station.id_token.clone())),
        };

        self.call(Call::transaction_event(request)?).await?;
        info!(
            station = %self.station_id,
            transaction_id = %transaction_id,
            "transaction started"
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let meter_task = tokio::spawn(Arc::clone(&self).run_meter_loop(stop_rx));

        slot.transaction_id = Some(transaction_id.clone());
        slot.meter_stop = Some(stop_tx);
        slot.meter_task = Some(meter_task);

        Ok(Some(transaction_id))
    }

    /// End the active transaction: stop the meter task, wait for it to
    /// finish, then send the Ended event. A stop with no active
    /// transaction is a no-op, so the command is idempotent.
    pub async fn send_transaction_event_ended(&self, reason: &str) -> Result<(), OcppError> {
        let mut slot = self.transaction.lock().await;

        let transaction_id = match slot.transaction_id.take() {
            Some(id) => id,
            None => {
                debug!(station = %self.station_id, reason, "no active transaction to stop");
                return Ok(());
            }
        };

        if let Some(stop) = slot.meter_stop.take() {
            let _ = stop.send(true);
        }
        if let Some(task) = slot.meter_task.take() {
            if let Err(e) = task.await {
                warn!(station = %self.station_id, error = %e, "meter task join failed");
            }
        }

        let timestamp = Utc::now();
        let request = TransactionEventRequest {
            event_type: TransactionEventType::Ended,
            timestamp,
            trigger_reason: TriggerReason::StopAuthorized,
            seq_no: 2,
            transaction_info: TransactionInfo {
                transaction_id: transaction_id.clone(),
                stopped_reason: Some(StoppedReason::EVDisconnected),
                charging_state: Some(ChargingState::Idle),
            },
            meter_value: Some(vec![MeterValue {
                timestamp,
                sampled_value: vec![SampledValue::energy_wh(100.0)],
            }]),
            offline: Some(false),
            evse: Some(Evse {
                id: self.evse_id,
                connector_id: None,
            }),
            id_token: Some(IdToken::central(self.station.id_token.clone())),
        };

        self.call(Call::transaction_event(request)?).await?;
        info!(
            station = %self.station_id,
            transaction_id = %transaction_id,
            reason,
            "transaction ended"
        );

        Ok(())
    }

    /// Periodic meter sampling while a transaction runs. Samples a rising
    /// energy register plus nominal voltage and current every
    /// `meter_interval` until the stop signal flips.
    async fn run_meter_loop(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let mut sample = 0u64;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.network.meter_interval) => {}
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        debug!(station = %self.station_id, "meter loop stopped");
                        return;
                    }
                    continue;
                }
            }

            let meter_value = MeterValue {
                timestamp: Utc::now(),
                sampled_value: vec![
                    SampledValue::energy_wh(1234.0 + sample as f64 * 10.0),
                    SampledValue::voltage(230.0),
                    SampledValue::current_import(16.0),
                ],
            };
            sample += 1;

            let call = match Call::meter_values(self.evse_id, vec![meter_value]) {
                Ok(call) => call,
                Err(e) => {
                    error!(station = %self.station_id, error = %e, "meter sample build failed");
                    continue;
                }
            };

            if let Err(e) = self.call(call).await {
                warn!(station = %self.station_id, error = %e, "meter sample not delivered");
                return;
            }
            debug!(station = %self.station_id, sample, "meter sample sent");
        }
    }

    /// Periodic heartbeats at the interval granted in the boot response.
    pub async fn run_heartbeat(self: Arc<Self>, interval: std::time::Duration) {
        loop {
            tokio::time::sleep(interval).await;

            let call = match Call::heartbeat() {
                Ok(call) => call,
                Err(e) => {
                    error!(station = %self.station_id, error = %e, "heartbeat build failed");
                    continue;
                }
            };

            match self.call(call).await {
                Ok(result) => match result.parse_payload::<HeartbeatResponse>() {
                    Ok(response) => {
                        debug!(
                            station = %self.station_id,
                            current_time = %response.current_time,
                            "heartbeat answered"
                        );
                    }
                    Err(e) => warn!(station = %self.station_id, error = %e, "bad heartbeat response"),
                },
                Err(e) => {
                    warn!(station = %self.station_id, error = %e, "heartbeat failed");
                    return;
                }
            }
        }
    }

    /// Consume commands forwarded from the ISO15118 side.
    pub async fn run_commands(
        self: Arc<Self>,
        mut commands: mpsc::UnboundedReceiver<StationCommand>,
    ) {
        while let Some(command) = commands.recv().await {
            let outcome = match command {
                StationCommand::StartTransaction { evse_id } => {
                    debug!(station = %self.station_id, evse_id, "start transaction command");
                    Arc::clone(&self)
                        .send_transaction_event_started()
                        .await
                        .map(|_| ())
                }
                StationCommand::StopTransaction { evse_id, reason } => {
                    debug!(station = %self.station_id, evse_id, %reason, "stop transaction command");
                    self.send_transaction_event_ended(&reason).await
                }
                StationCommand::PlugIn { evse_id } => {
                    debug!(station = %self.station_id, evse_id, "plug-in command");
                    self.plug_in_vehicle().await
                }
                StationCommand::SendStatus { evse_id, status } => {
                    debug!(station = %self.station_id, evse_id, %status, "status command");
                    self.send_status_notification(status).await
                }
            };

            if let Err(e) = outcome {
                error!(station = %self.station_id, error = %e, "command failed");
            }
        }

        debug!(station = %self.station_id, "command channel closed");
    }

    /// Connect to the Central System and run until the connection drops.
    ///
    /// Whatever ends the connection, the station's registry entry goes
    /// with it, so session-side forwards fail loudly instead of feeding
    /// a dead command loop.
    pub async fn run(
        self: Arc<Self>,
        registry: SessionRegistry,
        outgoing_rx: mpsc::UnboundedReceiver<OcppMessage>,
    ) -> Result<(), OcppError> {
        let result = Arc::clone(&self).run_session(outgoing_rx).await;
        registry.remove_station(&self.station_id);
        result
    }

    /// One connection's lifetime: bridges the outgoing channel onto the
    /// socket, kicks off the boot sequence and the heartbeat, and pumps
    /// inbound messages through [`handle_incoming`](Self::handle_incoming).
    async fn run_session(
        self: Arc<Self>,
        mut outgoing_rx: mpsc::UnboundedReceiver<OcppMessage>,
    ) -> Result<(), OcppError> {
        let url = format!("{}/{}", self.network.csms_url(), self.station_id);
        let uri: Uri = url.parse().map_err(|_| OcppError::InvalidFormat)?;

        let request = Request::builder()
            .uri(&url)
            .header(header::SEC_WEBSOCKET_PROTOCOL, OCPP_SUBPROTOCOL)
            .header(header::HOST, uri.host().unwrap_or("localhost"))
            .body(())
            .map_err(|_| OcppError::InvalidFormat)?;

        let ws_config = WebSocketConfig {
            max_message_size: Some(64 * 1024),
            max_frame_size: Some(16 * 1024),
            ..Default::default()
        };

        let (ws_stream, response) = connect_async_with_config(request, Some(ws_config), false)
            .await
            .map_err(|e| {
                error!(station = %self.station_id, error = %e, "WebSocket connection failed");
                OcppError::ConnectionClosed
            })?;

        let accepted = response
            .headers()
            .get(header::SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok());
        if accepted != Some(OCPP_SUBPROTOCOL) {
            warn!(
                station = %self.station_id,
                accepted = ?accepted,
                "server did not accept the ocpp2.0.1 subprotocol"
            );
        }

        info!(station = %self.station_id, url = %url, "connected to Central System");

        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        // Bridge outgoing channel -> socket
        let station_id = self.station_id.clone();
        let sender = tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                let bytes = match msg.to_bytes() {
                    Ok(b) => b,
                    Err(e) => {
                        error!(station = %station_id, error = %e, "serialize failed");
                        continue;
                    }
                };
                let text = String::from_utf8_lossy(&bytes).into_owned();
                debug!(station = %station_id, %text, "sending");
                if let Err(e) = ws_tx.send(Message::Text(text)).await {
                    error!(station = %station_id, error = %e, "send failed");
                    break;
                }
            }
        });

        // Heartbeats run for the whole connection, whatever the boot
        // outcome; the loop ends itself when a beat fails to deliver.
        let heartbeat = tokio::spawn(
            Arc::clone(&self).run_heartbeat(self.network.heartbeat_interval),
        );

        // Boot sequence runs concurrently with the receive loop so its
        // responses can be routed back to it.
        let booter = Arc::clone(&self);
        tokio::spawn(async move {
            match booter.send_boot_notification().await {
                Ok(Some(interval)) => {
                    debug!(station = %booter.station_id, interval, "boot granted interval");
                }
                Ok(None) => {}
                Err(e) => {
                    error!(station = %booter.station_id, error = %e, "boot sequence failed");
                }
            }
        });

        while let Some(msg) = ws_rx.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    debug!(station = %self.station_id, %text, "received");
                    match OcppMessage::parse(text.as_bytes()) {
                        Ok(msg) => self.handle_incoming(msg),
                        Err(e) => {
                            warn!(station = %self.station_id, error = %e, "unparseable message")
                        }
                    }
                }
                Ok(Message::Close(_)) => {
                    info!(station = %self.station_id, "connection closed by server");
                    break;
                }
                Ok(Message::Ping(_)) => debug!(station = %self.station_id, "ping"),
                Ok(_) => {}
                Err(e) => {
                    error!(station = %self.station_id, error = %e, "WebSocket error");
                    break;
                }
            }
        }

        heartbeat.abort();
        sender.abort();
        self.fail_pending();
        Ok(())
    }

    /// Resolve every in-flight call with a connection error. Called when
    /// the socket drops so waiters are not suspended forever.
    fn fail_pending(&self) {
        let pending: Vec<_> = self.pending.lock().drain().collect();
        for (_, tx) in pending {
            let _ = tx.send(Err(OcppError::ConnectionClosed));
        }
    }
}
