//! Schema wrapping for remotely registered tools.
//!
//! Providers declare arbitrary JSON-schema parameters. Exposing those raw to
//! AI clients would surface a large parameter area and let the AI call a
//! tool without ever reading its documentation, so every registered tool is
//! collapsed to a fixed outer shape:
//!
//! ```text
//! provider schema                     AI-visible schema
//! {action, url, selector, …}   →      { input: object }
//! ```
//!
//! Real execution is gated behind the installation unlock token, which the
//! AI obtains by calling the tool once with `{"input":{"operation":"readme"}}`.
//! [`wrap`] is a pure function; it holds no state and touches no locks.

use serde_json::{json, Value};

/// Output of [`wrap`]: everything the registry stores about a tool's shapes.
#[derive(Debug, Clone)]
pub struct WrappedTool {
    /// Description shown to AI clients in `tools/list`.
    pub ai_description: String,
    /// The fixed `{input: object}` outer schema exposed to AI clients.
    pub wrapped_schema: Value,
    /// The injected inner fields (`operation`, `tool_unlock_token`) an
    /// executing caller must supply.
    pub synthetic_schema: Value,
    /// Human-readable document returned by the `readme` operation.
    pub readme: String,
}

/// Wrap a provider-supplied tool definition into its compressed form.
///
/// `provider_readme` is the provider's short when-to-use summary; when
/// present (and non-blank) it becomes the AI-visible description, otherwise
/// a sentence referencing the tool name is synthesized.
pub fn wrap(
    tool_name: &str,
    original_description: &str,
    provider_readme: Option<&str>,
    original_schema: &Value,
    unlock_token: &str,
) -> WrappedTool {
    let ai_description = match provider_readme.map(str::trim).filter(|s| !s.is_empty()) {
        Some(readme) => readme.to_string(),
        None => format!(
            "Use this tool when you need to access {} functionality",
            tool_name
        ),
    };

    let synthetic_schema = json!({
        "properties": {
            "operation": {
                "type": "string",
                "enum": ["readme", "execute"],
                "description": "Operation to perform"
            },
            "tool_unlock_token": {
                "type": "string",
                "description": format!(
                    "Security token, {}, obtained from readme operation",
                    unlock_token
                )
            }
        },
        "required": ["operation", "tool_unlock_token"],
        "type": "object"
    });

    WrappedTool {
        ai_description,
        wrapped_schema: wrapped_input_schema(),
        synthetic_schema,
        readme: render_readme(original_description, original_schema, unlock_token),
    }
}

/// The canonical AI-visible schema shared by every wrapped tool.
pub fn wrapped_input_schema() -> Value {
    json!({
        "properties": {
            "input": {
                "type": "object",
                "description": "All tool parameters are passed in this single dict. Use {\"input\":{\"operation\":\"readme\"}} to get full documentation, parameters, and an unlock token."
            }
        },
        "required": [],
        "type": "object"
    })
}

fn render_readme(original_description: &str, original_schema: &Value, unlock_token: &str) -> String {
    format!(
        r#"## Available Operations

## Usage-Safety Token System
This tool uses an hmac-based token system to ensure callers fully understand all details of
using this tool, on every call. The token is specific to this installation, user, and code version.

Your tool_unlock_token for this installation is: {token}

You MUST include tool_unlock_token in the input dict for all operations except readme.

## Input Structure
All parameters are passed in a single 'input' dict:

1. For this documentation:
   {{
     "input": {{"operation": "readme"}}
   }}

2. For executing the tool:
   {{
     "input": {{
       "operation": "execute",
       "tool_unlock_token": "{token}",
       ... original tool parameters ...
     }}
   }}

## Original Tool Documentation
{description}

## Execute Operation Parameters
When using operation="execute", include the original tool parameters:

{{
  "input": {{
    "operation": "execute",
    "tool_unlock_token": "{token}",
{params}
  }}
}}
"#,
        token = unlock_token,
        description = original_description,
        params = example_parameter_lines(original_schema),
    )
}

/// Render one example line per property of the original schema, with a
/// type-appropriate placeholder value and a `// REQUIRED` marker for
/// properties listed in the schema's `required` array.
fn example_parameter_lines(original_schema: &Value) -> String {
    let required: Vec<&str> = original_schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let properties = original_schema
        .get("properties")
        .and_then(Value::as_object)
        .filter(|props| !props.is_empty());
    let properties = match properties {
        Some(props) => props,
        None => return "       // No additional parameters".to_string(),
    };

    let mut lines = Vec::with_capacity(properties.len());
    for (name, prop) in properties {
        let prop_type = prop.get("type").and_then(Value::as_str).unwrap_or("string");
        let example = match prop_type {
            "number" | "integer" => "123".to_string(),
            "boolean" => "true".to_string(),
            "array" => "[\"item1\", \"item2\"]".to_string(),
            "object" => "{}".to_string(),
            _ => format!("\"example_{}\"", name),
        };
        let required_marker = if required.contains(&name.as_str()) {
            " // REQUIRED"
        } else {
            ""
        };
        let description = prop.get("description").and_then(Value::as_str).unwrap_or("");
        lines.push(format!(
            "       \"{}\": {}{}  // {}",
            name, example, required_marker, description
        ));
    }
    lines.join(",\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn browser_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {"type": "string", "description": "URL to navigate to"},
                "timeout_ms": {"type": "integer", "description": "Maximum wait"},
                "capture": {"type": "boolean"},
                "headers": {"type": "object"},
                "selectors": {"type": "array"}
            },
            "required": ["url"]
        })
    }

    #[test]
    fn test_wrapped_schema_is_canonical_shape() {
        let wrapped = wrap("browser", "Controls a browser", None, &browser_schema(), "abc123");
        assert_eq!(wrapped.wrapped_schema, wrapped_input_schema());
        let properties = wrapped.wrapped_schema["properties"].as_object().unwrap();
        assert_eq!(properties.len(), 1);
        assert_eq!(wrapped.wrapped_schema["properties"]["input"]["type"], "object");
        assert_eq!(wrapped.wrapped_schema["type"], "object");
        assert_eq!(wrapped.wrapped_schema["required"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn test_wrap_is_idempotent_on_outer_shape() {
        // Wrapping a schema, then wrapping the exposed outer view again,
        // yields the same outer schema.
        let first = wrap("browser", "D", None, &browser_schema(), "abc123");
        let second = wrap("browser", "D", None, &first.wrapped_schema, "abc123");
        assert_eq!(first.wrapped_schema, second.wrapped_schema);
    }

    #[test]
    fn test_synthetic_schema_requires_both_injected_fields() {
        let wrapped = wrap("browser", "D", None, &browser_schema(), "abc123");
        let required = wrapped.synthetic_schema["required"].as_array().unwrap();
        assert!(required.contains(&json!("operation")));
        assert!(required.contains(&json!("tool_unlock_token")));
        assert_eq!(
            wrapped.synthetic_schema["properties"]["operation"]["enum"],
            json!(["readme", "execute"])
        );
        assert!(wrapped.synthetic_schema["properties"]["tool_unlock_token"]["description"]
            .as_str()
            .unwrap()
            .contains("abc123"));
    }

    #[test]
    fn test_readme_contains_token_and_examples() {
        let wrapped = wrap("browser", "Controls a browser", None, &browser_schema(), "abc123");
        assert!(wrapped.readme.contains("Your tool_unlock_token for this installation is: abc123"));
        assert!(wrapped.readme.contains("Controls a browser"));
        assert!(wrapped.readme.contains("\"url\": \"example_url\" // REQUIRED"));
        assert!(wrapped.readme.contains("\"timeout_ms\": 123"));
        assert!(wrapped.readme.contains("\"capture\": true"));
        assert!(wrapped.readme.contains("\"headers\": {}"));
        assert!(wrapped.readme.contains("\"selectors\": [\"item1\", \"item2\"]"));
        // only the required property carries the marker
        assert!(!wrapped.readme.contains("\"timeout_ms\": 123 // REQUIRED"));
    }

    #[test]
    fn test_readme_without_properties() {
        let wrapped = wrap("ping", "Pings", None, &json!({"type": "object"}), "abc123");
        assert!(wrapped.readme.contains("// No additional parameters"));
    }

    #[test]
    fn test_ai_description_prefers_provider_readme() {
        let wrapped = wrap(
            "browser",
            "Long internal description",
            Some("  Use the user's real browser.  "),
            &browser_schema(),
            "abc123",
        );
        assert_eq!(wrapped.ai_description, "Use the user's real browser.");

        let fallback = wrap("browser", "Long internal description", Some("   "), &browser_schema(), "abc123");
        assert_eq!(
            fallback.ai_description,
            "Use this tool when you need to access browser functionality"
        );
    }
}
