//! Protocol client - handshake, discovery and calls over any transport

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::Error;
use crate::tools::{ToolDefinition, ToolProvider};
use crate::Result;

use super::transport::McpTransport;
use super::types::{
    initialize_params, CallToolResult, InitializeResult, JsonRpcNotification, JsonRpcRequest,
    ListToolsResult,
};

/// Upper bound on `tools/list` pages, in case a server keeps handing out cursors
const MAX_LIST_PAGES: usize = 50;

/// Tool provider speaking JSON-RPC over a transport
pub struct McpClient<T> {
    name: String,
    transport: T,
    next_id: AtomicU64,
    timeout: Duration,
}

impl<T: McpTransport> McpClient<T> {
    pub fn new(name: &str, transport: T, timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            transport,
            next_id: AtomicU64::new(1),
            timeout,
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let request = JsonRpcRequest::new(self.next_id.fetch_add(1, Ordering::SeqCst), method, params);

        let message = tokio::time::timeout(self.timeout, self.transport.request(&request))
            .await
            .map_err(|_| Error::Tool(format!("{} timed out after {:?}", method, self.timeout)))??;

        message
            .into_result()
            .map_err(|e| Error::Tool(format!("{} failed: {}", method, e)))
    }
}

#[async_trait]
impl<T: McpTransport + 'static> ToolProvider for McpClient<T> {
    async fn connect(&self) -> Result<()> {
        tokio::time::timeout(self.timeout, self.transport.open())
            .await
            .map_err(|_| Error::Tool(format!("opening {} timed out", self.name)))??;

        let result: InitializeResult = serde_json::from_value(self.call("initialize", initialize_params()).await?)?;
        match &result.server_info {
            Some(server) => info!(
                "{} is {} {} (protocol {})",
                self.name,
                server.name,
                server.version.as_deref().unwrap_or("?"),
                result.protocol_version.as_deref().unwrap_or("?")
            ),
            None => debug!("{} did not identify itself", self.name),
        }

        self.transport
            .notify(&JsonRpcNotification::new("notifications/initialized"))
            .await
    }

    async fn list_tools(&self) -> Result<Vec<ToolDefinition>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = match &cursor {
                Some(cursor) => json!({"cursor": cursor}),
                None => json!({}),
            };
            let page: ListToolsResult = serde_json::from_value(self.call("tools/list", params).await?)?;

            tools.extend(page.tools.into_iter().map(|t| ToolDefinition {
                name: t.name,
                description: t.description.unwrap_or_default(),
                parameters: t.input_schema,
            }));

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(tools),
            }
        }

        debug!("{} returned more than {} tool pages; truncating", self.name, MAX_LIST_PAGES);
        Ok(tools)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<String> {
        let arguments = if arguments.is_object() { arguments } else { json!({}) };
        let value = self
            .call("tools/call", json!({"name": name, "arguments": arguments}))
            .await?;

        let result: CallToolResult = serde_json::from_value(value)?;
        if result.is_error {
            return Err(Error::Tool(result.text()));
        }
        Ok(result.text())
    }

    async fn disconnect(&self) -> Result<()> {
        self.transport.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::mcp::types::JsonRpcMessage;
    use std::sync::Mutex;

    /// Transport answering from a fixed script
    #[derive(Default)]
    struct ScriptedTransport {
        sent: Mutex<Vec<(String, Value)>>,
        notified: Mutex<Vec<String>>,
        hang: bool,
    }

    impl ScriptedTransport {
        fn answer(request: &JsonRpcRequest) -> Value {
            match request.method.as_str() {
                "initialize" => json!({
                    "result": {
                        "protocolVersion": "2024-11-05",
                        "serverInfo": {"name": "Automotive Spare Parts Retailer", "version": "1.0"}
                    }
                }),
                "tools/list" if request.params.get("cursor").is_none() => json!({
                    "result": {
                        "tools": [{"name": "check_availability", "description": "Check stock",
                                   "inputSchema": {"type": "object"}}],
                        "nextCursor": "page-2"
                    }
                }),
                "tools/list" => json!({"result": {"tools": [{"name": "order_part"}]}}),
                "tools/call" if request.params["name"] == "order_part" => json!({
                    "result": {"content": [{"type": "text", "text": "out of stock"}], "isError": true}
                }),
                "tools/call" => json!({
                    "result": {"content": [{"type": "text", "text": "Available gearbox for Ford Focus"}]}
                }),
                _ => json!({"error": {"code": -32601, "message": "Method not found"}}),
            }
        }
    }

    #[async_trait]
    impl McpTransport for ScriptedTransport {
        async fn request(&self, request: &JsonRpcRequest) -> Result<JsonRpcMessage> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            self.sent
                .lock()
                .unwrap()
                .push((request.method.clone(), request.params.clone()));

            let mut body = Self::answer(request);
            body["jsonrpc"] = json!("2.0");
            body["id"] = json!(request.id);
            Ok(serde_json::from_value(body)?)
        }

        async fn notify(&self, notification: &JsonRpcNotification) -> Result<()> {
            self.notified.lock().unwrap().push(notification.method.clone());
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn client() -> McpClient<ScriptedTransport> {
        McpClient::new("parts", ScriptedTransport::default(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_handshake() {
        let client = client();
        client.connect().await.unwrap();

        let sent = client.transport.sent.lock().unwrap();
        assert_eq!(sent[0].0, "initialize");
        assert_eq!(sent[0].1["protocolVersion"], "2024-11-05");
        assert_eq!(*client.transport.notified.lock().unwrap(), ["notifications/initialized"]);
    }

    #[tokio::test]
    async fn test_list_tools_follows_cursor() {
        let client = client();
        let tools = client.list_tools().await.unwrap();

        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["check_availability", "order_part"]);
        assert_eq!(tools[1].description, "");

        let sent = client.transport.sent.lock().unwrap();
        assert_eq!(sent[1].1["cursor"], "page-2");
    }

    #[tokio::test]
    async fn test_call_tool_text_and_error() {
        let client = client();
        let out = client
            .call_tool("check_availability", json!({"part_type": "gearbox", "car_model": "Ford Focus"}))
            .await
            .unwrap();
        assert_eq!(out, "Available gearbox for Ford Focus");

        let err = client.call_tool("order_part", Value::Null).await.unwrap_err();
        assert!(err.to_string().contains("out of stock"));

        let sent = client.transport.sent.lock().unwrap();
        assert_eq!(sent[1].1["arguments"], json!({}));
    }

    #[tokio::test]
    async fn test_rpc_error_is_reported() {
        let client = client();
        let err = client.call("resources/list", json!({})).await.unwrap_err();
        assert!(err.to_string().contains("Method not found"));
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let transport = ScriptedTransport {
            hang: true,
            ..Default::default()
        };
        let client = McpClient::new("slow", transport, Duration::from_millis(20));
        let err = client.list_tools().await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
