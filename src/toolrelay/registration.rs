//! Registration path for the built-in `remote` tool.
//!
//! External providers register their tools by calling `remote` with
//! `{"input": {"operation": "register", tool_name, description, parameters,
//! callback_endpoint, TOOL_API_KEY, readme?}}`. The payload is validated,
//! the schema is wrapped ([`schema::wrap`]), the record is inserted into the
//! registry with conflict resolution, and the host's AI-facing tool table is
//! updated in the same step: either both mutations land or the registry is
//! left unchanged.

use crate::toolrelay::dispatcher::{RemoteRelay, RemoteToolHandler};
use crate::toolrelay::host::{CallContext, HandlerOutcome, ToolHandler};
use crate::toolrelay::protocol::ContentEnvelope;
use crate::toolrelay::registry::ToolRecord;
use crate::toolrelay::schema;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;

pub(crate) const REMOTE_TOOL_NAME: &str = "remote";
pub(crate) const REMOTE_TOOL_DESCRIPTION: &str =
    "Internal tool for external systems to register remote tools. Do not call directly.";

/// Fields a registration payload must carry.
const REQUIRED_FIELDS: [&str; 5] = [
    "tool_name",
    "description",
    "parameters",
    "callback_endpoint",
    "TOOL_API_KEY",
];

/// AI-visible schema of the `remote` tool itself.
pub(crate) fn remote_tool_schema() -> Value {
    json!({
        "properties": {
            "input": {
                "type": "object",
                "description": "do not use."
            }
        },
        "required": [],
        "type": "object"
    })
}

/// Host-facing handler for the built-in `remote` tool.
pub(crate) struct RemoteRegistrationHandler {
    relay: Arc<RemoteRelay>,
}

impl RemoteRegistrationHandler {
    pub(crate) fn new(relay: Arc<RemoteRelay>) -> Self {
        Self { relay }
    }
}

#[async_trait]
impl ToolHandler for RemoteRegistrationHandler {
    async fn handle(&self, arguments: Value, ctx: CallContext) -> HandlerOutcome {
        HandlerOutcome::Immediate(register_remote_tool(&self.relay, arguments, &ctx).await)
    }
}

/// Validate a registration payload and register the tool. Registration
/// always resolves synchronously.
pub(crate) async fn register_remote_tool(
    relay: &Arc<RemoteRelay>,
    arguments: Value,
    ctx: &CallContext,
) -> ContentEnvelope {
    log::debug!("register payload from session {}: {}", ctx.session_id, arguments);

    let params = match arguments.get("input") {
        Some(Value::Object(_)) => &arguments["input"],
        _ => {
            return reject(
                "Invalid input format. Expected dictionary with 'input' key containing tool parameters."
                    .to_string(),
            )
        }
    };

    let operation = params.get("operation").and_then(Value::as_str).unwrap_or("");
    if operation != "register" {
        return reject(format!(
            "Invalid operation: '{}'. Only 'register' operation is supported.",
            operation
        ));
    }

    for field in REQUIRED_FIELDS {
        if params.get(field).is_none() {
            return reject(format!("Missing required parameter: {}", field));
        }
    }

    let base_name = match nonempty_str(params, "tool_name") {
        Some(name) => name,
        None => return reject("tool_name must be a non-empty string".to_string()),
    };
    let description = match nonempty_str(params, "description") {
        Some(description) => description,
        None => return reject("description must be a non-empty string".to_string()),
    };
    let parameters = match params.get("parameters") {
        Some(Value::Object(_)) => params["parameters"].clone(),
        _ => return reject("parameters must be a valid JSON object".to_string()),
    };
    let callback_endpoint = match nonempty_str(params, "callback_endpoint") {
        Some(endpoint) => endpoint,
        None => return reject("callback_endpoint must be a non-empty string".to_string()),
    };
    let api_key = match nonempty_str(params, "TOOL_API_KEY") {
        Some(key) => key,
        None => return reject("TOOL_API_KEY must be a non-empty string".to_string()),
    };
    let provider_readme = params.get("readme").and_then(Value::as_str);

    let wrapped = schema::wrap(
        base_name,
        description,
        provider_readme,
        &parameters,
        relay.unlock_token(),
    );
    let ai_description = wrapped.ai_description.clone();
    let wrapped_schema = wrapped.wrapped_schema.clone();

    let record = ToolRecord {
        name: base_name.to_string(),
        description: ai_description.clone(),
        wrapped_schema: wrapped.wrapped_schema,
        synthetic_schema: wrapped.synthetic_schema,
        original_schema: parameters,
        readme: wrapped.readme,
        callback_endpoint: callback_endpoint.to_string(),
        api_key: api_key.to_string(),
        session_id: ctx.session_id.clone(),
        registered_at: Utc::now(),
    };

    let outcome = relay.registry.insert(record, relay.host.as_ref()).await;
    if let Some(evicted) = outcome.evicted {
        // Keep the host table in lock-step with the eviction.
        if let Err(e) = relay.host.unregister_tool(&evicted.name).await {
            log::warn!("Could not unregister evicted tool {}: {}", evicted.name, e);
        }
    }

    let final_name = outcome.final_name;
    let handler = Arc::new(RemoteToolHandler::new(Arc::clone(relay), final_name.clone()));
    if let Err(e) = relay
        .host
        .register_tool(&final_name, &ai_description, wrapped_schema, handler)
        .await
    {
        // Roll back so the registry never names a tool the host can't serve.
        relay.registry.remove(&final_name).await;
        return reject(format!("Error processing registration request: {}", e));
    }

    relay.host.trigger_client_refresh(relay.config.refresh_delay).await;

    log::info!(
        "Successfully registered tool: {} (session {}, callback {})",
        final_name,
        ctx.session_id,
        callback_endpoint
    );

    let mut response_text = format!("Successfully registered tool: {}", final_name);
    if final_name != base_name {
        response_text.push_str(&format!(
            " (renamed from {} due to naming conflict)",
            base_name
        ));
    }
    ContentEnvelope::text(response_text)
}

fn nonempty_str<'a>(params: &'a Value, field: &str) -> Option<&'a str> {
    params
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn reject(message: String) -> ContentEnvelope {
    log::error!("Registration error: {}", message);
    ContentEnvelope::error(message)
}
