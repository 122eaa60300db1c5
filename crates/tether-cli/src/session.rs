//! The demo session: connect, log on, call one service method, log off.
//!
//! Every step after `connect` is driven by event handlers, so the whole
//! session runs inside the dispatch loop until the server hangs up or the
//! loop is cancelled.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use tether_core::config::DispatchConfig;
use tether_core::{
    CancellationToken, ConnectedInfo, DisconnectedInfo, EventDispatcher, EventKind,
    ServiceRequest, ServiceResponse, SessionResult, TetherClient,
};
use tracing::{error, info, warn};

/// What the session asks the server for.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub username: String,
    pub request: ServiceRequest,
}

/// What happened during a session.
#[derive(Debug, Clone, Default)]
pub struct SessionSummary {
    pub logged_on: bool,
    pub response: Option<ServiceResponse>,
    pub disconnect: Option<DisconnectedInfo>,
}

/// Subscribe the session's handlers.
fn wire_handlers(
    dispatcher: &mut EventDispatcher,
    client: &TetherClient,
    options: &SessionOptions,
    token: &CancellationToken,
    summary: &Arc<Mutex<SessionSummary>>,
) {
    {
        let client = client.clone();
        let username = options.username.clone();
        dispatcher.subscribe(EventKind::Connected, move |event| {
            let info: ConnectedInfo = event.payload_as()?;
            info!("Connected to {}! Logging in '{}'...", info.endpoint, username);

            let client = client.clone();
            let details = serde_json::json!({ "username": username });
            tokio::spawn(async move {
                if let Err(e) = client.log_on(details).await {
                    error!("Failed to send log-on: {}", e);
                }
            });
            Ok(())
        });
    }

    {
        let client = client.clone();
        let request = options.request.clone();
        let summary = summary.clone();
        dispatcher.subscribe(EventKind::LoggedOn, move |event| {
            let result: SessionResult = event.payload_as()?;
            let client = client.clone();

            if !result.is_ok() {
                warn!(
                    "Unable to log on: {} / {}",
                    result.result, result.extended_result
                );
                tokio::spawn(async move {
                    client.disconnect().await;
                });
                return Ok(());
            }

            if let Some(cell_id) = result.cell_id {
                client.set_cell_id(cell_id.into());
            }
            summary.lock().unwrap_or_else(|e| e.into_inner()).logged_on = true;
            info!("Successfully logged on! Calling {}...", request.name());

            let request = request.clone();
            tokio::spawn(async move {
                if let Err(e) = client.issue(request).await {
                    error!("Failed to issue service request: {}", e);
                }
            });
            Ok(())
        });
    }

    {
        let client = client.clone();
        let summary = summary.clone();
        dispatcher.subscribe(EventKind::ServiceResponse, move |event| {
            // Replies to requests this process did not issue are ignored.
            if event.claimed_job().is_none() {
                return Ok(());
            }
            let response: ServiceResponse = event.payload_as()?;
            if response.is_ok() {
                info!("{} returned {}", response.method, response.body);
            } else {
                warn!("{} failed with result {}", response.method, response.result);
            }
            summary.lock().unwrap_or_else(|e| e.into_inner()).response = Some(response);

            let client = client.clone();
            tokio::spawn(async move {
                if let Err(e) = client.log_off().await {
                    warn!("Failed to send log-off, disconnecting: {}", e);
                    client.disconnect().await;
                }
            });
            Ok(())
        });
    }

    dispatcher.subscribe(EventKind::LoggedOff, |event| {
        let result: SessionResult = event.payload_as()?;
        info!("Logged off: {}", result.result);
        Ok(())
    });

    {
        let token = token.clone();
        let summary = summary.clone();
        dispatcher.subscribe(EventKind::Disconnected, move |event| {
            let info: DisconnectedInfo = event.payload_as()?;
            match &info.reason {
                Some(reason) => info!("Disconnected: {}", reason),
                None => info!("Disconnected"),
            }
            summary.lock().unwrap_or_else(|e| e.into_inner()).disconnect = Some(info);
            token.cancel();
            Ok(())
        });
    }
}

/// Run one session to completion.
///
/// Returns once the session is disconnected or `token` is cancelled.
pub async fn run_session(
    client: &TetherClient,
    mut dispatcher: EventDispatcher,
    options: &SessionOptions,
    token: &CancellationToken,
) -> Result<SessionSummary> {
    let summary = Arc::new(Mutex::new(SessionSummary::default()));
    wire_handlers(&mut dispatcher, client, options, token, &summary);
    dispatcher.start();

    info!("Connecting...");
    client.connect().await?;

    let delivered = dispatcher
        .run_until_cancelled(token, DispatchConfig::DEFAULT_WAIT)
        .await;
    let stats = dispatcher.stats();
    info!(
        "Session over: {} events, {} handler errors, {} handler panics",
        delivered, stats.handler_errors, stats.handler_panics
    );

    if client.is_connected() {
        client.disconnect().await;
    }

    let summary = summary.lock().unwrap_or_else(|e| e.into_inner()).clone();
    Ok(summary)
}
