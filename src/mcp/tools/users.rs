//! Users and Groups Tools
//!
//! Anyone can list; creating and deleting requires an administrator.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{backend_failure, json_result, object_arg, parse_params, run, segment};
use crate::lab_client::{LabClient, LabClientError};
use crate::mcp::context::ToolContext;
use crate::mcp::protocol::ToolsCallResult;
use crate::mcp::registry::{McpRegistry, RegisteredTool, ToolBuilder, ToolCategory, ToolResult};

/// Register users and groups tools with the registry
pub fn register_tools(registry: &mut McpRegistry) {
    registry.register_tool(list_tool(
        "get_cml_users",
        "Get List of CML Users",
        "List users with id, username, fullname, email, admin status, groups and resource pool.",
        "/users",
    ));
    registry.register_tool(create_cml_user_tool());
    registry.register_tool(delete_tool(
        "delete_cml_user",
        "Delete CML User",
        "user_id",
        "/users",
    ));
    registry.register_tool(list_tool(
        "get_cml_groups",
        "Get List of CML Groups",
        "List groups with id, name, description, member user UUIDs and lab associations.",
        "/groups",
    ));
    registry.register_tool(create_cml_group_tool());
    registry.register_tool(delete_tool(
        "delete_cml_group",
        "Delete CML Group",
        "group_id",
        "/groups",
    ));
}

/// Run `call` only when the logged-in user is an administrator.
async fn as_admin<F, Fut, T>(ctx: &ToolContext, action: &'static str, call: F) -> ToolResult
where
    F: FnOnce(Arc<LabClient>) -> Fut,
    Fut: Future<Output = Result<T, LabClientError>>,
    T: Serialize,
{
    let client = ctx.client()?;
    match client.is_admin().await {
        Ok(true) => {}
        Ok(false) => {
            return Ok(ToolsCallResult::error(format!(
                "Only admin users can use {}",
                action
            )))
        }
        Err(err) => return backend_failure(action, err),
    }

    match call(client).await {
        Ok(value) => json_result(&value),
        Err(err) => backend_failure(action, err),
    }
}

fn list_tool(
    name: &'static str,
    title: &'static str,
    description: &'static str,
    path: &'static str,
) -> RegisteredTool {
    ToolBuilder::new(name)
        .title(title)
        .description(description)
        .category(ToolCategory::Read)
        .build(move |ctx, _params| async move {
            run(&ctx, name, |client| async move { client.get(path).await }).await
        })
}

fn delete_tool(
    name: &'static str,
    title: &'static str,
    id_field: &'static str,
    collection: &'static str,
) -> RegisteredTool {
    ToolBuilder::new(name)
        .title(title)
        .description(format!(
            "Delete by {}. Requires admin. Always confirm the deletion with the user first.",
            id_field
        ))
        .input_schema(json!({
            "type": "object",
            "properties": {
                id_field: { "type": "string", "description": "UUID" }
            },
            "required": [id_field]
        }))
        .category(ToolCategory::Destructive)
        .build(move |ctx, params| delete_handler(ctx, params, name, id_field, collection))
}

async fn delete_handler(
    ctx: ToolContext,
    params: Value,
    name: &'static str,
    id_field: &'static str,
    collection: &'static str,
) -> ToolResult {
    let id: String = parse_params(params.get(id_field).cloned().unwrap_or(Value::Null))?;
    let path = format!("{}/{}", collection, segment(&id));

    as_admin(&ctx, name, |client| async move {
        client.delete(&path).await?;
        Ok::<_, LabClientError>(true)
    })
    .await
}

/// POST `body` to `collection` and return the new object's id.
async fn create(
    ctx: &ToolContext,
    action: &'static str,
    collection: &'static str,
    body: Value,
) -> ToolResult {
    as_admin(ctx, action, |client| async move {
        let created = client.post(collection, &body).await?;
        Ok::<_, LabClientError>(created.and_then(|c| c.get("id").cloned()))
    })
    .await
}

// ============================================================================
// create_cml_user
// ============================================================================

#[derive(Debug, Deserialize)]
struct NewUser {
    #[allow(dead_code)]
    username: String,
    #[allow(dead_code)]
    password: String,
}

fn create_cml_user_tool() -> RegisteredTool {
    ToolBuilder::new("create_cml_user")
        .title("Create CML User")
        .description("Create a user. Requires admin. Returns the user UUID.")
        .input_schema(json!({
            "type": "object",
            "properties": {
                "user": {
                    "type": "object",
                    "properties": {
                        "username": { "type": "string" },
                        "password": { "type": "string" },
                        "fullname": { "type": "string" },
                        "description": { "type": "string" },
                        "email": { "type": "string" },
                        "groups": { "type": "array", "items": { "type": "string" } },
                        "admin": { "type": "boolean" },
                        "resource_pool": { "type": "string" }
                    },
                    "required": ["username", "password"]
                }
            },
            "required": ["user"]
        }))
        .category(ToolCategory::Write)
        .build(create_cml_user_handler)
}

async fn create_cml_user_handler(ctx: ToolContext, params: Value) -> ToolResult {
    let user = object_arg(params.get("user").cloned().unwrap_or(Value::Null))?;
    parse_params::<NewUser>(user.clone())?;
    create(&ctx, "create_cml_user", "/users", user).await
}

// ============================================================================
// create_cml_group
// ============================================================================

#[derive(Debug, Deserialize)]
struct NewGroup {
    #[allow(dead_code)]
    name: String,
}

fn create_cml_group_tool() -> RegisteredTool {
    ToolBuilder::new("create_cml_group")
        .title("Create CML Group")
        .description("Create a group. Requires admin. Returns the group UUID.")
        .input_schema(json!({
            "type": "object",
            "properties": {
                "group": {
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "description": { "type": "string" },
                        "members": { "type": "array", "items": { "type": "string" } },
                        "associations": { "type": "array", "items": { "type": "object" } }
                    },
                    "required": ["name"]
                }
            },
            "required": ["group"]
        }))
        .category(ToolCategory::Write)
        .build(create_cml_group_handler)
}

async fn create_cml_group_handler(ctx: ToolContext, params: Value) -> ToolResult {
    let group = object_arg(params.get("group").cloned().unwrap_or(Value::Null))?;
    parse_params::<NewGroup>(group.clone())?;
    create(&ctx, "create_cml_group", "/groups", group).await
}
