//! Command/response protocol of the plugin and its dispatch onto the
//! lifecycle operations.

use std::time::Duration;

use mcm_vsphere_core::{MachineProvider, MachineSpec, Operation, Platform, ProviderError, Secrets};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Commandes reçues sur le topic de commande
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MachineCommand {
    Create {
        request_id: String,
        machine_name: String,
        spec: MachineSpec,
        secrets: Secrets,
    },
    Delete {
        request_id: String,
        machine_name: String,
        #[serde(default)]
        provider_id: String,
        spec: MachineSpec,
        secrets: Secrets,
    },
    Shutdown {
        request_id: String,
        machine_name: String,
        #[serde(default)]
        provider_id: String,
        spec: MachineSpec,
        secrets: Secrets,
    },
    Status {
        request_id: String,
        machine_name: String,
        #[serde(default)]
        provider_id: String,
        spec: MachineSpec,
        secrets: Secrets,
    },
    List {
        request_id: String,
        spec: MachineSpec,
        secrets: Secrets,
    },
}

impl MachineCommand {
    pub fn request_id(&self) -> &str {
        match self {
            Self::Create { request_id, .. }
            | Self::Delete { request_id, .. }
            | Self::Shutdown { request_id, .. }
            | Self::Status { request_id, .. }
            | Self::List { request_id, .. } => request_id,
        }
    }

    pub fn operation(&self) -> Operation {
        match self {
            Self::Create { .. } => Operation::Create,
            Self::Delete { .. } => Operation::Delete,
            Self::Shutdown { .. } => Operation::ShutDown,
            Self::Status { .. } => Operation::GetStatus,
            Self::List { .. } => Operation::List,
        }
    }
}

/// Réponses publiées sur le topic de réponse
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MachineResponse {
    Success {
        request_id: String,
        action: String,
        data: Value,
        completed_at: String,
    },
    Error {
        request_id: String,
        action: String,
        code: String,
        error: String,
        completed_at: String,
    },
}

impl MachineResponse {
    pub fn success(request_id: &str, operation: Operation, data: Value) -> Self {
        Self::Success {
            request_id: request_id.to_string(),
            action: operation.as_str().to_string(),
            data,
            completed_at: now_rfc3339(),
        }
    }

    pub fn failure(request_id: &str, operation: Operation, err: &ProviderError) -> Self {
        Self::Error {
            request_id: request_id.to_string(),
            action: operation.as_str().to_string(),
            code: err.code().to_string(),
            error: err.to_string(),
            completed_at: now_rfc3339(),
        }
    }

    /// Payload that is not a valid command.
    pub fn invalid(error: impl std::fmt::Display) -> Self {
        Self::Error {
            request_id: "unknown".to_string(),
            action: "parse".to_string(),
            code: "invalid_command".to_string(),
            error: format!("Invalid command JSON: {}", error),
            completed_at: now_rfc3339(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}

pub fn parse_command(payload: &[u8]) -> Result<MachineCommand, MachineResponse> {
    serde_json::from_slice(payload).map_err(MachineResponse::invalid)
}

/// Child of `parent` that also fires after `timeout` (never when zero).
/// The timer task ends as soon as the returned token is cancelled.
pub fn deadline_token(parent: &CancellationToken, timeout: Duration) -> CancellationToken {
    let token = parent.child_token();
    if !timeout.is_zero() {
        let timer = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    warn!("operation deadline of {:?} reached, cancelling", timeout);
                    timer.cancel();
                }
                _ = timer.cancelled() => {}
            }
        });
    }
    token
}

/// Runs one command to completion and builds its response.
pub async fn process_command<P: Platform>(
    provider: &MachineProvider<P>,
    command: MachineCommand,
    cancel: &CancellationToken,
) -> MachineResponse {
    let operation = command.operation();
    let request_id = command.request_id().to_string();
    debug!(request_id = %request_id, operation = %operation, "processing command");

    let result = match command {
        MachineCommand::Create { machine_name, spec, secrets, .. } => provider
            .create_machine(&machine_name, &spec, &secrets, cancel)
            .await
            .map(|id| json!({ "provider_id": id, "machine_name": machine_name })),
        MachineCommand::Delete { machine_name, provider_id, spec, secrets, .. } => provider
            .delete_machine(&machine_name, &provider_id, &spec, &secrets, cancel)
            .await
            .map(|id| json!({ "provider_id": id })),
        MachineCommand::Shutdown { machine_name, provider_id, spec, secrets, .. } => provider
            .shut_down_machine(&machine_name, &provider_id, &spec, &secrets, cancel)
            .await
            .map(|id| json!({ "provider_id": id })),
        MachineCommand::Status { machine_name, provider_id, spec, secrets, .. } => provider
            .get_machine_status(&machine_name, &provider_id, &spec, &secrets, cancel)
            .await
            .map(|status| serde_json::to_value(status).unwrap_or_default()),
        MachineCommand::List { spec, secrets, .. } => provider
            .list_machines(&spec, &secrets, cancel)
            .await
            .map(|machines| json!({ "machines": machines })),
    };

    match result {
        Ok(data) => {
            info!(request_id = %request_id, operation = %operation, "command succeeded");
            MachineResponse::success(&request_id, operation, data)
        }
        Err(e) => {
            warn!(request_id = %request_id, operation = %operation, code = e.code(), "command failed: {}", e);
            MachineResponse::failure(&request_id, operation, &e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcm_vsphere_devkit::{CommandBuilder, TestHarness};

    fn command(value: Value) -> MachineCommand {
        parse_command(value.to_string().as_bytes()).unwrap()
    }

    fn to_json(response: &MachineResponse) -> Value {
        serde_json::to_value(response).unwrap()
    }

    #[tokio::test]
    async fn test_create_then_status() {
        let harness = TestHarness::new();
        let builder = CommandBuilder::new("eu-1");

        let created = process_command(&harness.provider, command(builder.create("req-1", "worker-0")), &harness.cancel).await;
        let created = to_json(&created);
        assert_eq!(created["type"], "success");
        assert_eq!(created["action"], "create");
        assert_eq!(created["request_id"], "req-1");
        let id = created["data"]["provider_id"].as_str().unwrap().to_string();
        assert!(id.starts_with("vsphere://eu-1/"));

        let status = process_command(
            &harness.provider,
            command(builder.targeted("status", "req-2", "worker-0", &id)),
            &harness.cancel,
        )
        .await;
        let status = to_json(&status);
        assert_eq!(status["action"], "status");
        assert_eq!(status["data"]["status"], "present");
        assert_eq!(status["data"]["provider_id"], id.as_str());
    }

    #[tokio::test]
    async fn test_delete_absent_machine_returns_empty_id() {
        let harness = TestHarness::new();
        let builder = CommandBuilder::new("eu-1");

        let response = process_command(
            &harness.provider,
            command(builder.targeted("delete", "req-3", "ghost", "")),
            &harness.cancel,
        )
        .await;
        assert!(response.is_success());
        assert_eq!(to_json(&response)["data"]["provider_id"], "");
    }

    #[tokio::test]
    async fn test_list_returns_machine_map() {
        let harness = TestHarness::new();
        let machine_id = harness.add_tagged_machine("worker-1");
        let builder = CommandBuilder::new("eu-1");

        let response = process_command(&harness.provider, command(builder.list("req-4")), &harness.cancel).await;
        let response = to_json(&response);
        let key = format!("vsphere://eu-1/{}", machine_id);
        assert_eq!(response["data"]["machines"][key.as_str()], "worker-1");
    }

    #[tokio::test]
    async fn test_errors_carry_code() {
        let harness = TestHarness::new();
        harness.add_tagged_machine("twin");
        harness.add_tagged_machine("twin");
        let builder = CommandBuilder::new("eu-1");

        let response = process_command(
            &harness.provider,
            command(builder.targeted("shutdown", "req-5", "twin", "")),
            &harness.cancel,
        )
        .await;
        let response = to_json(&response);
        assert_eq!(response["type"], "error");
        assert_eq!(response["action"], "shutdown");
        assert_eq!(response["code"], "ambiguous_name");
    }

    #[test]
    fn test_invalid_payload() {
        let response = match parse_command(br#"{"action":"reboot","request_id":"x"}"#) {
            Ok(cmd) => panic!("unexpected command {cmd:?}"),
            Err(response) => to_json(&response),
        };
        assert_eq!(response["request_id"], "unknown");
        assert_eq!(response["action"], "parse");
        assert_eq!(response["code"], "invalid_command");
        assert!(parse_command(b"not json").is_err());
    }

    #[tokio::test]
    async fn test_deadline_token_fires() {
        let root = CancellationToken::new();
        let token = deadline_token(&root, Duration::from_millis(10));
        tokio::time::timeout(Duration::from_secs(2), token.cancelled()).await.unwrap();
        assert!(!root.is_cancelled());
    }

    #[tokio::test]
    async fn test_deadline_token_follows_parent() {
        let root = CancellationToken::new();
        let token = deadline_token(&root, Duration::ZERO);
        root.cancel();
        assert!(token.is_cancelled());
    }
}
