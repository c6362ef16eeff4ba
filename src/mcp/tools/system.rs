//! System Tools
//!
//! Read-only views of controller health, statistics and licensing.

use serde::Deserialize;
use serde_json::{json, Value};

use super::{parse_params, run, segment};
use crate::mcp::context::ToolContext;
use crate::mcp::registry::{McpRegistry, RegisteredTool, ToolBuilder, ToolCategory, ToolResult};

/// Register system tools with the registry
pub fn register_tools(registry: &mut McpRegistry) {
    registry.register_tool(get_tool(
        "get_cml_information",
        "Get CML Information",
        "Get CML server version, hostname and product information.",
        "/system_information",
    ));
    registry.register_tool(get_tool(
        "get_cml_status",
        "Get CML Status",
        "Get CML server health: compute nodes, controller and overall validity.",
        "/system_health",
    ));
    registry.register_tool(get_tool(
        "get_cml_statistics",
        "Get CML Statistics",
        "Get CML resource usage statistics: CPU, memory, disk and running nodes.",
        "/system_stats",
    ));
    registry.register_tool(get_tool(
        "get_cml_licensing_details",
        "Get CML Licensing Details",
        "Get CML licensing status, registration and feature usage.",
        "/licensing",
    ));
    registry.register_tool(get_tool(
        "get_cml_node_definitions",
        "Get CML Node Definitions",
        "List the node definitions (device types) available for new nodes.",
        "/simplified_node_definitions",
    ));
    registry.register_tool(get_node_definition_detail_tool());
}

fn get_tool(
    name: &'static str,
    title: &'static str,
    description: &'static str,
    path: &'static str,
) -> RegisteredTool {
    ToolBuilder::new(name)
        .title(title)
        .description(description)
        .category(ToolCategory::Read)
        .build(move |ctx, params| get_handler(ctx, params, name, path))
}

async fn get_handler(
    ctx: ToolContext,
    _params: Value,
    name: &'static str,
    path: &'static str,
) -> ToolResult {
    run(&ctx, name, |client| async move { client.get(path).await }).await
}

#[derive(Debug, Deserialize)]
struct NodeDefinitionParams {
    did: String,
}

fn get_node_definition_detail_tool() -> RegisteredTool {
    ToolBuilder::new("get_node_definition_detail")
        .title("Get Details About a Node Definition")
        .description(
            "Get a node definition by id: interfaces, device configuration, boot options \
             and resource requirements.",
        )
        .input_schema(json!({
            "type": "object",
            "properties": {
                "did": { "type": "string", "description": "Node definition ID, e.g. iosv" }
            },
            "required": ["did"]
        }))
        .category(ToolCategory::Read)
        .build(get_node_definition_detail_handler)
}

async fn get_node_definition_detail_handler(ctx: ToolContext, params: Value) -> ToolResult {
    let params: NodeDefinitionParams = parse_params(params)?;
    let path = format!("/node_definitions/{}", segment(&params.did));

    run(&ctx, "getting node definition detail", |client| async move {
        client.get_with_query(&path, &[("json", "true")]).await
    })
    .await
}
