//! Nodes Tools

use serde::Deserialize;
use serde_json::{json, Value};

use super::{object_arg, parse_params, run, segment};
use crate::lab_client::LabClientError;
use crate::mcp::context::ToolContext;
use crate::mcp::registry::{McpRegistry, RegisteredTool, ToolBuilder, ToolCategory, ToolResult};

/// Register nodes tools with the registry
pub fn register_tools(registry: &mut McpRegistry) {
    registry.register_tool(get_nodes_for_cml_lab_tool());
    registry.register_tool(add_node_to_cml_lab_tool());
    registry.register_tool(configure_cml_node_tool());
    registry.register_tool(start_cml_node_tool());
    registry.register_tool(stop_cml_node_tool());
    registry.register_tool(wipe_cml_node_tool());
    registry.register_tool(delete_cml_node_tool());
}

#[derive(Debug, Deserialize)]
struct LabParams {
    lid: String,
}

#[derive(Debug, Deserialize)]
struct NodeParams {
    lid: String,
    nid: String,
}

fn node_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "lid": { "type": "string", "description": "Lab UUID" },
            "nid": { "type": "string", "description": "Node UUID" }
        },
        "required": ["lid", "nid"]
    })
}

impl NodeParams {
    fn path(&self) -> String {
        format!("/labs/{}/nodes/{}", segment(&self.lid), segment(&self.nid))
    }
}

// ============================================================================
// get_nodes_for_cml_lab
// ============================================================================

fn get_nodes_for_cml_lab_tool() -> RegisteredTool {
    ToolBuilder::new("get_nodes_for_cml_lab")
        .title("Get All Nodes for a CML Lab")
        .description(
            "List the nodes of a lab with their operational state, \
             excluding configurations.",
        )
        .input_schema(json!({
            "type": "object",
            "properties": {
                "lid": { "type": "string", "description": "Lab UUID" }
            },
            "required": ["lid"]
        }))
        .category(ToolCategory::Read)
        .build(get_nodes_for_cml_lab_handler)
}

async fn get_nodes_for_cml_lab_handler(ctx: ToolContext, params: Value) -> ToolResult {
    let params: LabParams = parse_params(params)?;
    let path = format!("/labs/{}/nodes", segment(&params.lid));

    run(&ctx, "getting nodes for lab", |client| async move {
        client
            .get_with_query(
                &path,
                &[
                    ("data", "true"),
                    ("operational", "true"),
                    ("exclude_configurations", "true"),
                ],
            )
            .await
    })
    .await
}

// ============================================================================
// add_node_to_cml_lab
// ============================================================================

fn add_node_to_cml_lab_tool() -> RegisteredTool {
    ToolBuilder::new("add_node_to_cml_lab")
        .title("Add a Node to a CML Lab")
        .description(
            "Add a node to a lab. The node object needs at least label, node_definition, \
             x and y; interfaces are created automatically. Returns the node UUID.",
        )
        .input_schema(json!({
            "type": "object",
            "properties": {
                "lid": { "type": "string", "description": "Lab UUID" },
                "node": {
                    "type": "object",
                    "properties": {
                        "label": { "type": "string" },
                        "node_definition": { "type": "string" },
                        "image_definition": { "type": "string" },
                        "x": { "type": "integer" },
                        "y": { "type": "integer" },
                        "configuration": { "type": "string" },
                        "tags": { "type": "array", "items": { "type": "string" } }
                    },
                    "required": ["label", "node_definition", "x", "y"]
                }
            },
            "required": ["lid", "node"]
        }))
        .category(ToolCategory::Write)
        .build(add_node_to_cml_lab_handler)
}

async fn add_node_to_cml_lab_handler(ctx: ToolContext, params: Value) -> ToolResult {
    let node = object_arg(params.get("node").cloned().unwrap_or(Value::Null))?;
    let params: LabParams = parse_params(params)?;
    let path = format!("/labs/{}/nodes", segment(&params.lid));

    run(&ctx, "adding node to lab", |client| async move {
        let created = client
            .post_with_query(&path, &[("populate_interfaces", "true")], &node)
            .await?;
        Ok::<_, LabClientError>(created.and_then(|c| c.get("id").cloned()))
    })
    .await
}

// ============================================================================
// configure_cml_node
// ============================================================================

#[derive(Debug, Deserialize)]
struct ConfigureNodeParams {
    lid: String,
    nid: String,
    config: String,
}

fn configure_cml_node_tool() -> RegisteredTool {
    ToolBuilder::new("configure_cml_node")
        .title("Configure a CML Node")
        .description(
            "Set a node's startup configuration. The node must be in the CREATED state \
             (new or wiped). The config is a string of device commands.",
        )
        .input_schema(json!({
            "type": "object",
            "properties": {
                "lid": { "type": "string", "description": "Lab UUID" },
                "nid": { "type": "string", "description": "Node UUID" },
                "config": { "type": "string", "description": "Startup configuration" }
            },
            "required": ["lid", "nid", "config"]
        }))
        .category(ToolCategory::Write)
        .idempotent()
        .build(configure_cml_node_handler)
}

async fn configure_cml_node_handler(ctx: ToolContext, params: Value) -> ToolResult {
    let params: ConfigureNodeParams = parse_params(params)?;
    let path = format!("/labs/{}/nodes/{}", segment(&params.lid), segment(&params.nid));
    let body = json!({ "configuration": params.config });

    run(&ctx, "configuring node", |client| async move {
        client.patch(&path, &body).await?;
        Ok::<_, LabClientError>(true)
    })
    .await
}

// ============================================================================
// Node state
// ============================================================================

fn start_cml_node_tool() -> RegisteredTool {
    ToolBuilder::new("start_cml_node")
        .title("Start a CML Node")
        .description("Start a single node in a lab.")
        .input_schema(node_schema())
        .category(ToolCategory::Write)
        .idempotent()
        .build(|ctx, params| node_state(ctx, params, "start"))
}

fn stop_cml_node_tool() -> RegisteredTool {
    ToolBuilder::new("stop_cml_node")
        .title("Stop a CML Node")
        .description("Stop a single node in a lab.")
        .input_schema(node_schema())
        .category(ToolCategory::Write)
        .idempotent()
        .build(|ctx, params| node_state(ctx, params, "stop"))
}

async fn node_state(ctx: ToolContext, params: Value, state: &'static str) -> ToolResult {
    let params: NodeParams = parse_params(params)?;
    let path = format!("{}/state/{}", params.path(), state);

    run(&ctx, "changing node state", |client| async move {
        client.put(&path).await?;
        Ok::<_, LabClientError>(true)
    })
    .await
}

fn wipe_cml_node_tool() -> RegisteredTool {
    ToolBuilder::new("wipe_cml_node")
        .title("Wipe a CML Node")
        .description(
            "Erase all data of a stopped node. Always confirm with the user first.",
        )
        .input_schema(node_schema())
        .category(ToolCategory::Destructive)
        .idempotent()
        .build(wipe_cml_node_handler)
}

async fn wipe_cml_node_handler(ctx: ToolContext, params: Value) -> ToolResult {
    let params: NodeParams = parse_params(params)?;
    let path = format!("{}/wipe_disks", params.path());

    run(&ctx, "wiping node", |client| async move {
        client.put(&path).await?;
        Ok::<_, LabClientError>(true)
    })
    .await
}

fn delete_cml_node_tool() -> RegisteredTool {
    ToolBuilder::new("delete_cml_node")
        .title("Delete a CML Node")
        .description(
            "Delete a node, stopping it and wiping its disks first. \
             Always confirm with the user first.",
        )
        .input_schema(node_schema())
        .category(ToolCategory::Destructive)
        .build(delete_cml_node_handler)
}

async fn delete_cml_node_handler(ctx: ToolContext, params: Value) -> ToolResult {
    let params: NodeParams = parse_params(params)?;
    let path = params.path();

    run(&ctx, "deleting node", |client| async move {
        client.put(&format!("{}/state/stop", path)).await?;
        client.put(&format!("{}/wipe_disks", path)).await?;
        client.delete(&path).await?;
        Ok::<_, LabClientError>(true)
    })
    .await
}
