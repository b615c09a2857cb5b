use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use kcart_core::domain::user::{User, UserType};
use kcart_core::errors::EngineError;

use crate::lang::LanguageTag;
use crate::session::ActiveFlow;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON-schema subset: `object` with typed `properties`, `required`,
    /// and optional `enum` constraints.
    pub parameters: Value,
}

/// Which user types may see and call a tool. Unregistered sessions only
/// get registration and read-only discovery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ToolAccess {
    pub unknown: bool,
    pub buyer: bool,
    pub seller: bool,
}

impl ToolAccess {
    pub const EVERYONE: Self = Self { unknown: true, buyer: true, seller: true };
    pub const REGISTERED: Self = Self { unknown: false, buyer: true, seller: true };
    pub const BUYER_ONLY: Self = Self { unknown: false, buyer: true, seller: false };
    pub const SELLER_ONLY: Self = Self { unknown: false, buyer: false, seller: true };

    pub fn allows(&self, user_type: UserType) -> bool {
        match user_type {
            UserType::Unknown => self.unknown,
            UserType::Buyer => self.buyer,
            UserType::Seller => self.seller,
        }
    }
}

/// Session state a tool may read and mutate during one invocation. The
/// engine copies this out of the locked session before the loop and merges
/// it back after, so tools never touch the session store directly.
#[derive(Clone, Debug)]
pub struct ToolContext {
    pub user: Option<User>,
    pub language: LanguageTag,
    pub flow: ActiveFlow,
    pub slots: BTreeMap<String, String>,
    pub now: DateTime<Utc>,
}

impl ToolContext {
    pub fn user_type(&self) -> UserType {
        self.user.as_ref().map(|user| user.user_type).unwrap_or(UserType::Unknown)
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> ToolDescriptor;

    fn access(&self) -> ToolAccess;

    /// Mutating tools are never auto-retried after a failed invocation.
    fn mutates(&self) -> bool {
        false
    }

    /// Whether the tool may run while the session is inside `flow`. A tool
    /// that would start a second flow returns false mid-flow; the registry
    /// then reports a `FlowConflict` instead of dispatching.
    fn allowed_in_flow(&self, _flow: &ActiveFlow) -> bool {
        true
    }

    async fn invoke(&self, ctx: &mut ToolContext, arguments: &Value)
        -> Result<Value, EngineError>;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.descriptor().name, tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Descriptors visible to a user type inside a given flow, in stable
    /// name order. This is the whitelist handed to the model; anything else
    /// does not exist as far as the model is concerned.
    pub fn catalog(&self, user_type: UserType, flow: &ActiveFlow) -> Vec<ToolDescriptor> {
        self.tools
            .values()
            .filter(|tool| tool.access().allows(user_type) && tool.allowed_in_flow(flow))
            .map(|tool| tool.descriptor())
            .collect()
    }

    /// Validate arguments against the tool's schema and dispatch. A tool
    /// outside the caller's access set is reported as unknown rather than
    /// forbidden; its existence is not disclosed.
    pub async fn invoke(
        &self,
        name: &str,
        ctx: &mut ToolContext,
        arguments: &Value,
    ) -> Result<Value, EngineError> {
        let tool = self.get(name).ok_or_else(|| EngineError::UnknownTool(name.to_string()))?;
        if !tool.access().allows(ctx.user_type()) {
            return Err(EngineError::UnknownTool(name.to_string()));
        }
        if !tool.allowed_in_flow(&ctx.flow) {
            // Outside a flow, a flow-bound tool is simply not there; inside
            // one, a tool that would start another flow is a conflict.
            return Err(match &ctx.flow {
                ActiveFlow::Idle => EngineError::UnknownTool(name.to_string()),
                flow => EngineError::FlowConflict {
                    active: flow.label().to_string(),
                    requested: name.to_string(),
                },
            });
        }

        let descriptor = tool.descriptor();
        if let Err(reason) = validate_arguments(&descriptor.parameters, arguments) {
            return Err(EngineError::ToolArgument { tool: name.to_string(), reason });
        }

        tool.invoke(ctx, arguments).await
    }
}

/// Validates `arguments` against the JSON-schema subset tool descriptors
/// use. Returns the first violation as a human-readable reason that is
/// also fed back to the model for its single correction attempt.
pub fn validate_arguments(schema: &Value, arguments: &Value) -> Result<(), String> {
    let Some(schema_object) = schema.as_object() else {
        return Ok(());
    };

    if schema_object.get("type").and_then(Value::as_str) != Some("object") {
        return Ok(());
    }

    let Some(arguments_object) = arguments.as_object() else {
        return Err("arguments must be a JSON object".to_string());
    };

    if let Some(required) = schema_object.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if !arguments_object.contains_key(field) {
                return Err(format!("missing required field `{field}`"));
            }
        }
    }

    let empty = serde_json::Map::new();
    let properties =
        schema_object.get("properties").and_then(Value::as_object).unwrap_or(&empty);

    for (field, value) in arguments_object {
        let Some(property) = properties.get(field) else {
            return Err(format!("unexpected field `{field}`"));
        };
        check_property(field, property, value)?;
    }

    Ok(())
}

fn check_property(field: &str, property: &Value, value: &Value) -> Result<(), String> {
    if let Some(expected) = property.get("type").and_then(Value::as_str) {
        let ok = match expected {
            "string" => value.is_string(),
            "number" => value.is_number(),
            "integer" => value.is_i64() || value.is_u64(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            _ => true,
        };
        if !ok {
            return Err(format!("field `{field}` must be of type {expected}"));
        }

        if expected == "array" {
            if let (Some(item_schema), Some(items)) = (property.get("items"), value.as_array()) {
                for (index, item) in items.iter().enumerate() {
                    check_property(&format!("{field}[{index}]"), item_schema, item)?;
                }
            }
        }
    }

    if let Some(allowed) = property.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            let options: Vec<String> = allowed.iter().map(Value::to_string).collect();
            return Err(format!("field `{field}` must be one of {}", options.join(", ")));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::{json, Value};

    use kcart_core::domain::user::UserType;
    use kcart_core::errors::EngineError;

    use super::{
        validate_arguments, Tool, ToolAccess, ToolContext, ToolDescriptor, ToolRegistry,
    };
    use crate::lang::LanguageTag;
    use crate::session::ActiveFlow;

    struct EchoTool;

    #[async_trait::async_trait]
    impl Tool for EchoTool {
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor {
                name: "echo".to_string(),
                description: "Echo the provided text".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": { "text": { "type": "string" } },
                    "required": ["text"],
                }),
            }
        }

        fn access(&self) -> ToolAccess {
            ToolAccess::SELLER_ONLY
        }

        async fn invoke(
            &self,
            _ctx: &mut ToolContext,
            arguments: &Value,
        ) -> Result<Value, EngineError> {
            Ok(json!({ "echoed": arguments["text"] }))
        }
    }

    fn context() -> ToolContext {
        ToolContext {
            user: None,
            language: LanguageTag::English,
            flow: ActiveFlow::Idle,
            slots: std::collections::BTreeMap::new(),
            now: Utc::now(),
        }
    }

    fn seller_context() -> ToolContext {
        use kcart_core::domain::user::{User, UserId};
        ToolContext {
            user: Some(User {
                id: UserId("s-1".to_string()),
                name: "Marta".to_string(),
                phone: "+251911000001".to_string(),
                location: None,
                user_type: UserType::Seller,
                created_at: Utc::now(),
            }),
            ..context()
        }
    }

    #[test]
    fn schema_rejects_missing_required_wrong_type_and_unknown_fields() {
        let schema = json!({
            "type": "object",
            "properties": {
                "name": { "type": "string" },
                "quantity": { "type": "number" },
                "mode": { "type": "string", "enum": ["cod", "mobile_money"] },
            },
            "required": ["name"],
        });

        assert!(validate_arguments(&schema, &json!({ "name": "Tomato" })).is_ok());
        assert!(validate_arguments(&schema, &json!({})).is_err());
        assert!(validate_arguments(&schema, &json!({ "name": 4 })).is_err());
        assert!(validate_arguments(&schema, &json!({ "name": "x", "extra": 1 })).is_err());
        assert!(validate_arguments(&schema, &json!({ "name": "x", "mode": "card" })).is_err());
        assert!(validate_arguments(&schema, &json!({ "name": "x", "mode": "cod" })).is_ok());
    }

    #[tokio::test]
    async fn unknown_and_inaccessible_tools_are_indistinguishable() {
        let mut registry = ToolRegistry::new();
        registry.register(std::sync::Arc::new(EchoTool));

        let mut unregistered = context();
        let missing =
            registry.invoke("no_such_tool", &mut unregistered, &json!({})).await.expect_err("err");
        let hidden = registry
            .invoke("echo", &mut unregistered, &json!({ "text": "hi" }))
            .await
            .expect_err("err");

        assert!(matches!(missing, EngineError::UnknownTool(_)));
        assert!(matches!(hidden, EngineError::UnknownTool(_)));
    }

    #[tokio::test]
    async fn catalog_is_filtered_by_user_type() {
        let mut registry = ToolRegistry::new();
        registry.register(std::sync::Arc::new(EchoTool));

        assert!(registry.catalog(UserType::Unknown, &ActiveFlow::Idle).is_empty());
        assert_eq!(registry.catalog(UserType::Seller, &ActiveFlow::Idle).len(), 1);

        let mut seller = seller_context();
        let result = registry
            .invoke("echo", &mut seller, &json!({ "text": "hi" }))
            .await
            .expect("seller can invoke");
        assert_eq!(result["echoed"], "hi");
    }

    struct IdleOnlyTool;

    #[async_trait::async_trait]
    impl Tool for IdleOnlyTool {
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor {
                name: "start_something".to_string(),
                description: "Starts a flow".to_string(),
                parameters: json!({ "type": "object", "properties": {} }),
            }
        }

        fn access(&self) -> ToolAccess {
            ToolAccess::EVERYONE
        }

        fn allowed_in_flow(&self, flow: &ActiveFlow) -> bool {
            matches!(flow, ActiveFlow::Idle)
        }

        async fn invoke(
            &self,
            _ctx: &mut ToolContext,
            _arguments: &Value,
        ) -> Result<Value, EngineError> {
            Ok(json!({}))
        }
    }

    #[tokio::test]
    async fn mid_flow_the_registry_hides_and_rejects_flow_starting_tools() {
        let mut registry = ToolRegistry::new();
        registry.register(std::sync::Arc::new(IdleOnlyTool));

        assert_eq!(registry.catalog(UserType::Buyer, &ActiveFlow::Idle).len(), 1);
        assert!(registry.catalog(UserType::Buyer, &ActiveFlow::Registration).is_empty());

        let mut ctx = ToolContext { flow: ActiveFlow::Registration, ..context() };
        let conflict =
            registry.invoke("start_something", &mut ctx, &json!({})).await.expect_err("conflict");
        assert_eq!(
            conflict,
            EngineError::FlowConflict {
                active: "registration".to_string(),
                requested: "start_something".to_string(),
            }
        );
    }
}
