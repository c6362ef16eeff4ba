//! Links Tools
//!
//! Interfaces and the links between them.

use serde::Deserialize;
use serde_json::{json, Value};

use super::{object_arg, parse_params, run, segment};
use crate::lab_client::LabClientError;
use crate::mcp::context::ToolContext;
use crate::mcp::protocol::McpError;
use crate::mcp::registry::{McpRegistry, RegisteredTool, ToolBuilder, ToolCategory, ToolResult};

/// Register links tools with the registry
pub fn register_tools(registry: &mut McpRegistry) {
    registry.register_tool(get_interfaces_for_node_tool());
    registry.register_tool(add_interface_to_node_tool());
    registry.register_tool(connect_two_nodes_tool());
    registry.register_tool(get_all_links_for_lab_tool());
    registry.register_tool(start_cml_link_tool());
    registry.register_tool(stop_cml_link_tool());
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

#[derive(Debug, Deserialize)]
struct LinkParams {
    lid: String,
    link_id: String,
}

#[derive(Debug, Deserialize)]
struct LinkInfo {
    src_int: String,
    dst_int: String,
}

fn get_interfaces_for_node_tool() -> RegisteredTool {
    ToolBuilder::new("get_interfaces_for_node")
        .title("Get Interfaces for a CML Node")
        .description(
            "List the interfaces of a node. Use the interface UUIDs to connect nodes.",
        )
        .input_schema(json!({
            "type": "object",
            "properties": {
                "lid": { "type": "string", "description": "Lab UUID" },
                "nid": { "type": "string", "description": "Node UUID" }
            },
            "required": ["lid", "nid"]
        }))
        .category(ToolCategory::Read)
        .build(get_interfaces_for_node_handler)
}

async fn get_interfaces_for_node_handler(ctx: ToolContext, params: Value) -> ToolResult {
    let params: NodeParams = parse_params(params)?;
    let path = format!(
        "/labs/{}/nodes/{}/interfaces",
        segment(&params.lid),
        segment(&params.nid)
    );

    run(&ctx, "getting interfaces for node", |client| async move {
        client
            .get_with_query(&path, &[("data", "true"), ("operational", "false")])
            .await
    })
    .await
}

#[derive(Debug, Deserialize)]
struct InterfaceRequest {
    node: String,
    #[serde(default)]
    slot: Option<u32>,
    #[serde(default)]
    mac_address: Option<String>,
}

fn add_interface_to_node_tool() -> RegisteredTool {
    ToolBuilder::new("add_interface_to_node")
        .title("Add an Interface to a CML Node")
        .description(
            "Add an interface to a node. Returns the interface with id, node, slot, type \
             and MAC address.",
        )
        .input_schema(json!({
            "type": "object",
            "properties": {
                "lid": { "type": "string", "description": "Lab UUID" },
                "intf": {
                    "type": "object",
                    "properties": {
                        "node": { "type": "string", "description": "Node UUID" },
                        "slot": { "type": "integer", "minimum": 0, "maximum": 128 },
                        "mac_address": { "type": "string", "description": "00:11:22:33:44:55 format" }
                    },
                    "required": ["node"]
                }
            },
            "required": ["lid", "intf"]
        }))
        .category(ToolCategory::Write)
        .build(add_interface_to_node_handler)
}

async fn add_interface_to_node_handler(ctx: ToolContext, params: Value) -> ToolResult {
    let intf = object_arg(params.get("intf").cloned().unwrap_or(Value::Null))?;
    let intf: InterfaceRequest = parse_params(intf)?;
    if intf.slot.is_some_and(|slot| slot > 128) {
        return Err(McpError::InvalidParams("slot must be between 0 and 128".to_string()));
    }
    let params: LabParams = parse_params(params)?;
    let path = format!("/labs/{}/interfaces", segment(&params.lid));

    let mut body = json!({ "node": intf.node });
    if let Some(slot) = intf.slot {
        body["slot"] = json!(slot);
    }
    if let Some(mac_address) = intf.mac_address {
        body["mac_address"] = json!(mac_address);
    }

    run(&ctx, "adding interface to node", |client| async move {
        client.post(&path, &body).await
    })
    .await
}

fn connect_two_nodes_tool() -> RegisteredTool {
    ToolBuilder::new("connect_two_nodes")
        .title("Connect Two CML Nodes")
        .description(
            "Create a link between two interfaces. Both interfaces must be unused. \
             Returns the link UUID.",
        )
        .input_schema(json!({
            "type": "object",
            "properties": {
                "lid": { "type": "string", "description": "Lab UUID" },
                "link_info": {
                    "type": "object",
                    "properties": {
                        "src_int": { "type": "string", "description": "Source interface UUID" },
                        "dst_int": { "type": "string", "description": "Destination interface UUID" }
                    },
                    "required": ["src_int", "dst_int"]
                }
            },
            "required": ["lid", "link_info"]
        }))
        .category(ToolCategory::Write)
        .build(connect_two_nodes_handler)
}

async fn connect_two_nodes_handler(ctx: ToolContext, params: Value) -> ToolResult {
    let link_info = object_arg(params.get("link_info").cloned().unwrap_or(Value::Null))?;
    let link_info: LinkInfo = parse_params(link_info)?;
    let params: LabParams = parse_params(params)?;
    let path = format!("/labs/{}/links", segment(&params.lid));
    let body = json!({ "src_int": link_info.src_int, "dst_int": link_info.dst_int });

    run(&ctx, "connecting nodes", |client| async move {
        let created = client.post(&path, &body).await?;
        Ok::<_, LabClientError>(created.and_then(|c| c.get("id").cloned()))
    })
    .await
}

fn get_all_links_for_lab_tool() -> RegisteredTool {
    ToolBuilder::new("get_all_links_for_lab")
        .title("Get All Links for a CML Lab")
        .description("List every link in a lab.")
        .input_schema(json!({
            "type": "object",
            "properties": {
                "lid": { "type": "string", "description": "Lab UUID" }
            },
            "required": ["lid"]
        }))
        .category(ToolCategory::Read)
        .build(get_all_links_for_lab_handler)
}

async fn get_all_links_for_lab_handler(ctx: ToolContext, params: Value) -> ToolResult {
    let params: LabParams = parse_params(params)?;
    let path = format!("/labs/{}/links", segment(&params.lid));

    run(&ctx, "getting links for lab", |client| async move {
        client.get_with_query(&path, &[("data", "true")]).await
    })
    .await
}

fn link_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "lid": { "type": "string", "description": "Lab UUID" },
            "link_id": { "type": "string", "description": "Link UUID" }
        },
        "required": ["lid", "link_id"]
    })
}

fn start_cml_link_tool() -> RegisteredTool {
    ToolBuilder::new("start_cml_link")
        .title("Start a CML Link")
        .description("Bring a link up.")
        .input_schema(link_schema())
        .category(ToolCategory::Write)
        .idempotent()
        .build(|ctx, params| link_state(ctx, params, "start"))
}

fn stop_cml_link_tool() -> RegisteredTool {
    ToolBuilder::new("stop_cml_link")
        .title("Stop a CML Link")
        .description("Take a link down.")
        .input_schema(link_schema())
        .category(ToolCategory::Write)
        .idempotent()
        .build(|ctx, params| link_state(ctx, params, "stop"))
}

async fn link_state(ctx: ToolContext, params: Value, state: &'static str) -> ToolResult {
    let params: LinkParams = parse_params(params)?;
    let path = format!(
        "/labs/{}/links/{}/state/{}",
        segment(&params.lid),
        segment(&params.link_id),
        state
    );

    run(&ctx, "changing link state", |client| async move {
        client.put(&path).await?;
        Ok::<_, LabClientError>(true)
    })
    .await
}
