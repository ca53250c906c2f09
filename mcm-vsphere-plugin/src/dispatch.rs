//! Runs each incoming command in its own tracked task and publishes the
//! response. Closing the dispatcher stops new work; waiting on it lets the
//! in-flight commands finish (cancelled by shutdown) and answer first.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use mcm_vsphere_core::{MachineProvider, Platform};
use rumqttc::{AsyncClient, QoS};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, warn};

use crate::commands::{deadline_token, parse_command, process_command, MachineResponse};

/// Where responses go. The MQTT client in production.
#[async_trait]
pub trait ResponseSink: Clone + Send + Sync + 'static {
    async fn send(&self, topic: &str, payload: String) -> Result<()>;
}

#[async_trait]
impl ResponseSink for AsyncClient {
    async fn send(&self, topic: &str, payload: String) -> Result<()> {
        self.publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .context("failed to publish response")
    }
}

pub struct Dispatcher<P, S> {
    provider: Arc<MachineProvider<P>>,
    sink: S,
    response_topic: String,
    timeout: Duration,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl<P, S> Dispatcher<P, S>
where
    P: Platform + 'static,
    S: ResponseSink,
{
    pub fn new(
        provider: Arc<MachineProvider<P>>,
        sink: S,
        response_topic: String,
        timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            provider,
            sink,
            response_topic,
            timeout,
            shutdown,
            tracker: TaskTracker::new(),
        }
    }

    /// Starts one command. Ignored once the dispatcher is closed.
    pub fn dispatch(&self, payload: Vec<u8>) {
        if self.tracker.is_closed() {
            warn!("shutting down, dropping command ({} bytes)", payload.len());
            return;
        }
        let token = deadline_token(&self.shutdown, self.timeout);
        self.tracker.spawn(handle_command(
            Arc::clone(&self.provider),
            self.sink.clone(),
            self.response_topic.clone(),
            payload,
            token,
        ));
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    pub fn close(&self) {
        self.tracker.close();
    }

    /// Resolves once closed and every started command has answered.
    pub async fn wait(&self) {
        self.tracker.wait().await
    }
}

async fn handle_command<P: Platform, S: ResponseSink>(
    provider: Arc<MachineProvider<P>>,
    sink: S,
    response_topic: String,
    payload: Vec<u8>,
    cancel: CancellationToken,
) {
    // Ends the deadline timer whatever the outcome.
    let _guard = cancel.clone().drop_guard();

    let response = match parse_command(&payload) {
        Ok(command) => process_command(&provider, command, &cancel).await,
        Err(response) => {
            warn!("rejected malformed command ({} bytes)", payload.len());
            response
        }
    };
    publish_response(&sink, &response_topic, &response).await;
}

async fn publish_response<S: ResponseSink>(sink: &S, topic: &str, response: &MachineResponse) {
    match serde_json::to_string(response) {
        Ok(json) => {
            if let Err(e) = sink.send(topic, json).await {
                error!("{:#}", e);
            }
        }
        Err(e) => error!("failed to encode response: {}", e),
    }
}
