//! Wire types for the relay's JSON-RPC surface.
//!
//! Everything that crosses a transport boundary lives here: the MCP content
//! envelope (`{content:[…], isError:bool}`), plain JSON-RPC requests,
//! responses and notifications, and the reverse envelope the relay pushes to
//! a tool provider's event stream when an AI invokes one of its tools.
//!
//! The shapes are contractual. AI clients depend on the content envelope and
//! response layout; providers depend on the reverse envelope layout. Field
//! renames (`isError`, `mimeType`) match the JSON casing used on the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC protocol version tag used on every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Method names understood by the relay.
pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_TOOLS_LIST: &str = "tools/list";
pub const METHOD_TOOLS_CALL: &str = "tools/call";
pub const METHOD_TOOLS_REPLY: &str = "tools/reply";
pub const METHOD_TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";

/// One content item in a tool result.
///
/// Text is the common case; providers may also return inline images
/// (base64 payload plus mime type).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToolContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

/// The standard MCP tool-result envelope: `{content:[…], isError:bool}`.
///
/// Structured errors travel in this shape with `is_error == true` rather
/// than as JSON-RPC error objects, so the AI always receives something it
/// can read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentEnvelope {
    pub content: Vec<ToolContent>,
    #[serde(rename = "isError")]
    pub is_error: bool,
}

impl ContentEnvelope {
    /// Successful single-text result.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// Error result carrying a single text item.
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: true,
        }
    }

    /// The first text content item, if any.
    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(|item| match item {
            ToolContent::Text { text } => Some(text.as_str()),
            _ => None,
        })
    }
}

/// Incoming JSON-RPC request (or notification, when `id` is absent).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(method: impl Into<String>, id: Option<Value>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// Outgoing JSON-RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC error object, used only where the protocol itself demands one
/// (e.g. unknown method on the HTTP surface).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// Outgoing JSON-RPC notification (no id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// The envelope pushed to a provider's event stream when an AI calls one of
/// its tools.
///
/// `id` and `reverse.call_id` both carry the relay-minted call id; the
/// provider echoes it as the `id` of its `tools/reply`. `reverse.input` is a
/// complete nested `tools/call` whose own id is the AI's original request id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReverseEnvelope {
    pub jsonrpc: String,
    pub id: String,
    pub reverse: ReverseCall,
}

/// Body of a [`ReverseEnvelope`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReverseCall {
    pub tool: String,
    pub input: JsonRpcRequest,
    pub call_id: String,
    #[serde(rename = "isError")]
    pub is_error: bool,
}

impl ReverseEnvelope {
    pub fn new(call_id: String, tool: String, input: JsonRpcRequest) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: call_id.clone(),
            reverse: ReverseCall {
                tool,
                input,
                call_id,
                is_error: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_envelope_serializes_is_error_camel_case() {
        let envelope = ContentEnvelope::error("boom");
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["isError"], json!(true));
        assert_eq!(value["content"][0]["type"], json!("text"));
        assert_eq!(value["content"][0]["text"], json!("boom"));
    }

    #[test]
    fn test_image_content_mime_type_rename() {
        let item = ToolContent::Image {
            data: "aGk=".to_string(),
            mime_type: "image/png".to_string(),
        };
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["type"], json!("image"));
        assert_eq!(value["mimeType"], json!("image/png"));
    }

    #[test]
    fn test_first_text_skips_images() {
        let envelope = ContentEnvelope {
            content: vec![
                ToolContent::Image {
                    data: String::new(),
                    mime_type: "image/png".to_string(),
                },
                ToolContent::Text {
                    text: "hello".to_string(),
                },
            ],
            is_error: false,
        };
        assert_eq!(envelope.first_text(), Some("hello"));
    }

    #[test]
    fn test_reverse_envelope_shape() {
        let inner = JsonRpcRequest::new(
            METHOD_TOOLS_CALL,
            Some(json!(7)),
            json!({"name": "browser", "arguments": {"url": "https://example.com"}}),
        );
        let envelope = ReverseEnvelope::new("abc-123".to_string(), "browser".to_string(), inner);
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["jsonrpc"], json!("2.0"));
        assert_eq!(value["id"], json!("abc-123"));
        assert_eq!(value["reverse"]["tool"], json!("browser"));
        assert_eq!(value["reverse"]["call_id"], json!("abc-123"));
        assert_eq!(value["reverse"]["isError"], json!(false));
        assert_eq!(value["reverse"]["input"]["method"], json!("tools/call"));
        assert_eq!(value["reverse"]["input"]["id"], json!(7));
        assert_eq!(
            value["reverse"]["input"]["params"]["arguments"]["url"],
            json!("https://example.com")
        );
    }

    #[test]
    fn test_request_parses_without_params() {
        let request: JsonRpcRequest =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}))
                .unwrap();
        assert_eq!(request.method, METHOD_TOOLS_LIST);
        assert!(request.params.is_null());
    }

    #[test]
    fn test_response_omits_empty_fields() {
        let response = JsonRpcResponse::success(json!(1), json!({"ok": true}));
        let value = serde_json::to_value(&response).unwrap();
        assert!(value.get("error").is_none());
        let response = JsonRpcResponse::error(json!(1), -32601, "Method not found");
        let value = serde_json::to_value(&response).unwrap();
        assert!(value.get("result").is_none());
        assert_eq!(value["error"]["code"], json!(-32601));
    }
}
