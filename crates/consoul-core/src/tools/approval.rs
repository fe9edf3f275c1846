use super::tool::RiskLevel;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;

/// A single tool call awaiting a yes/no decision (§4.5).
#[derive(Debug, Clone)]
pub struct ToolRequest {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
    pub risk_level: RiskLevel,
}

/// Asks something — a human, a fixed policy — whether a tool call may run.
/// Implementations never execute the tool; they only answer yes/no.
#[async_trait]
pub trait ApprovalCoordinator: Send + Sync {
    async fn request_approval(&self, request: ToolRequest) -> bool;
}

/// Approves everything. Used when a session's `PermissionPolicy` already
/// resolved to `Auto` and no prompt is needed — never used for `Prompt`
/// decisions, which must reach a coordinator backed by a real human.
pub struct AutoApproveCoordinator;

#[async_trait]
impl ApprovalCoordinator for AutoApproveCoordinator {
    async fn request_approval(&self, _request: ToolRequest) -> bool {
        true
    }
}

/// Denies everything, regardless of risk. Used as the coordinator for
/// non-interactive contexts (e.g. an SDK caller with no approval channel
/// configured) where a `Prompt` decision has no human to reach.
pub struct DenyAllCoordinator;

#[async_trait]
impl ApprovalCoordinator for DenyAllCoordinator {
    async fn request_approval(&self, _request: ToolRequest) -> bool {
        false
    }
}

/// Minimal terminal-driven coordinator: prints the request and reads y/n from
/// stdin. Intended for local SDK usage outside the HTTP/WS server, not for
/// production deployments.
pub struct CliApprovalCoordinator;

#[async_trait]
impl ApprovalCoordinator for CliApprovalCoordinator {
    async fn request_approval(&self, request: ToolRequest) -> bool {
        use std::io::Write;
        println!(
            "\napprove tool call? {} {} (risk: {:?}) [y/N] ",
            request.name, request.arguments, request.risk_level
        );
        let _ = std::io::stdout().flush();
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line).is_err() {
            return false;
        }
        matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
    }
}

/// Routes approval requests over a WebSocket connection: sends a
/// `tool_approval_request` message and waits for the matching
/// `tool_approval` reply, keyed by `tool_call_id`, with a timeout. Mirrors
/// the request/response pairing of a browser-facing approval UI (§4.9).
pub struct WebsocketApprovalCoordinator {
    send: Box<dyn Fn(serde_json::Value) -> Result<(), anyhow::Error> + Send + Sync>,
    pending: Mutex<HashMap<String, oneshot::Sender<bool>>>,
    timeout: Duration,
}

impl WebsocketApprovalCoordinator {
    pub fn new(
        send: impl Fn(serde_json::Value) -> Result<(), anyhow::Error> + Send + Sync + 'static,
    ) -> Self {
        Self {
            send: Box::new(send),
            pending: Mutex::new(HashMap::new()),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolves a pending request from a client's `tool_approval` message.
    /// Returns `false` if the id has no matching pending request (either
    /// unknown or already timed out/resolved).
    pub fn handle_approval(&self, tool_call_id: &str, approved: bool) -> bool {
        let sender = self.pending.lock().unwrap().remove(tool_call_id);
        match sender {
            Some(tx) => tx.send(approved).is_ok(),
            None => false,
        }
    }

    /// Cancels every outstanding approval, denying them. Called when the
    /// connection drops so no `on_tool_request` call is left blocked.
    pub fn cancel_all(&self) {
        for (_, tx) in self.pending.lock().unwrap().drain() {
            let _ = tx.send(false);
        }
    }
}

#[async_trait]
impl ApprovalCoordinator for WebsocketApprovalCoordinator {
    async fn request_approval(&self, request: ToolRequest) -> bool {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(request.id.clone(), tx);

        let sent = (self.send)(serde_json::json!({
            "type": "tool_approval_request",
            "data": {
                "id": request.id,
                "name": request.name,
                "arguments": request.arguments,
                "risk_level": request.risk_level,
            },
        }));
        if sent.is_err() {
            self.pending.lock().unwrap().remove(&request.id);
            return false;
        }

        let result = timeout(self.timeout, rx).await;
        self.pending.lock().unwrap().remove(&request.id);
        match result {
            Ok(Ok(approved)) => approved,
            Ok(Err(_)) => false, // sender dropped (cancel_all or disconnect)
            Err(_) => false,     // timed out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: &str) -> ToolRequest {
        ToolRequest {
            id: id.to_string(),
            name: "bash".to_string(),
            arguments: serde_json::json!({ "command": "ls" }),
            risk_level: RiskLevel::Caution,
        }
    }

    #[tokio::test]
    async fn auto_approve_always_true() {
        assert!(AutoApproveCoordinator.request_approval(request("1")).await);
    }

    #[tokio::test]
    async fn deny_all_always_false() {
        assert!(!DenyAllCoordinator.request_approval(request("1")).await);
    }

    #[tokio::test]
    async fn websocket_coordinator_resolves_on_handle_approval() {
        let sent = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let sent_clone = sent.clone();
        let coordinator = std::sync::Arc::new(
            WebsocketApprovalCoordinator::new(move |msg| {
                sent_clone.lock().unwrap().push(msg);
                Ok(())
            })
            .with_timeout(Duration::from_secs(5)),
        );

        let coordinator_clone = coordinator.clone();
        let handle = tokio::spawn(async move { coordinator_clone.request_approval(request("call_1")).await });

        // Give the request a moment to register itself as pending.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(coordinator.handle_approval("call_1", true));

        assert!(handle.await.unwrap());
        assert_eq!(sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn websocket_coordinator_denies_on_timeout() {
        let coordinator = WebsocketApprovalCoordinator::new(|_| Ok(())).with_timeout(Duration::from_millis(10));
        assert!(!coordinator.request_approval(request("call_2")).await);
    }

    #[tokio::test]
    async fn cancel_all_denies_pending_requests() {
        let coordinator = std::sync::Arc::new(
            WebsocketApprovalCoordinator::new(|_| Ok(())).with_timeout(Duration::from_secs(5)),
        );
        let coordinator_clone = coordinator.clone();
        let handle = tokio::spawn(async move { coordinator_clone.request_approval(request("call_3")).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        coordinator.cancel_all();

        assert!(!handle.await.unwrap());
    }
}
