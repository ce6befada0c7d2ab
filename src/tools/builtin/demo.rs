//! Greeting tool for smoke-testing a setup

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::Tool;
use crate::Result;

use super::BuiltinProvider;

pub(super) fn provider() -> BuiltinProvider {
    let mut provider = BuiltinProvider::new("sample-demo");
    provider.register(HelloTool);
    provider
}

struct HelloTool;

#[async_trait]
impl Tool for HelloTool {
    fn name(&self) -> &str { "hello" }
    fn description(&self) -> &str { "A simple tool that returns a greeting." }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "Who to greet (default \"world\")"
                }
            }
        })
    }

    async fn execute(&self, params: Value) -> Result<String> {
        let name = params.get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("world");
        Ok(format!("Hello, {}!", name))
    }
}
