//! Labs Tools
//!
//! Listing, creating and driving the lifecycle of labs.

use std::time::Duration;

use futures::future::try_join_all;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{backend_failure, json_result, object_arg, parse_params, run, segment};
use crate::lab_client::{LabClient, LabClientError};
use crate::mcp::context::ToolContext;
use crate::mcp::protocol::ToolsCallResult;
use crate::mcp::registry::{McpRegistry, RegisteredTool, ToolBuilder, ToolCategory, ToolResult};

const CONVERGENCE_POLL_INTERVAL: Duration = Duration::from_secs(3);
const CONVERGENCE_TIMEOUT: Duration = Duration::from_secs(600);

/// Register labs tools with the registry
pub fn register_tools(registry: &mut McpRegistry) {
    registry.register_tool(get_cml_labs_tool());
    registry.register_tool(get_cml_lab_by_title_tool());
    registry.register_tool(create_empty_lab_tool());
    registry.register_tool(modify_cml_lab_tool());
    registry.register_tool(start_cml_lab_tool());
    registry.register_tool(stop_cml_lab_tool());
    registry.register_tool(wipe_cml_lab_tool());
    registry.register_tool(delete_cml_lab_tool());
    registry.register_tool(download_lab_topology_tool());
    registry.register_tool(clone_cml_lab_tool());
}

#[derive(Debug, Deserialize)]
struct LabParams {
    lid: String,
}

fn lab_id_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "lid": { "type": "string", "description": "Lab UUID" }
        },
        "required": ["lid"]
    })
}

/// IDs of every lab visible to the current user.
async fn all_lab_ids(client: &LabClient) -> Result<Vec<String>, LabClientError> {
    let labs = client
        .get_with_query("/labs", &[("show_all", "true")])
        .await?
        .unwrap_or(Value::Null);
    Ok(serde_json::from_value(labs).unwrap_or_default())
}

async fn all_labs(client: &LabClient) -> Result<Vec<Value>, LabClientError> {
    let ids = all_lab_ids(client).await?;
    let labs = try_join_all(
        ids.iter()
            .map(|lid| async move { client.get(&format!("/labs/{}", segment(lid))).await }),
    )
    .await?;
    Ok(labs.into_iter().flatten().collect())
}

// ============================================================================
// get_cml_labs
// ============================================================================

#[derive(Debug, Deserialize)]
struct GetLabsParams {
    #[serde(default)]
    user: Option<String>,
}

fn get_cml_labs_tool() -> RegisteredTool {
    ToolBuilder::new("get_cml_labs")
        .title("Get All CML Labs")
        .description(
            "Retrieve labs, optionally only those owned by the given user. \
             Returns id, lab_title, owner_username, description and state.",
        )
        .input_schema(json!({
            "type": "object",
            "properties": {
                "user": { "type": "string", "description": "Owner username to filter by" }
            }
        }))
        .category(ToolCategory::Read)
        .build(get_cml_labs_handler)
}

async fn get_cml_labs_handler(ctx: ToolContext, params: Value) -> ToolResult {
    let params: GetLabsParams = parse_params(params)?;
    // Some clients send the literal string "null" for an omitted user.
    let user = params.user.filter(|u| !u.is_empty() && u != "null");

    run(&ctx, "getting CML labs", |client| async move {
        let labs = all_labs(&client).await?;
        Ok::<_, LabClientError>(labs
            .into_iter()
            .filter(|lab| match &user {
                Some(user) => lab.get("owner_username").and_then(Value::as_str) == Some(user),
                None => true,
            })
            .collect::<Vec<_>>())
    })
    .await
}

// ============================================================================
// get_cml_lab_by_title
// ============================================================================

#[derive(Debug, Deserialize)]
struct LabByTitleParams {
    title: String,
}

fn get_cml_lab_by_title_tool() -> RegisteredTool {
    ToolBuilder::new("get_cml_lab_by_title")
        .title("Get a CML Lab by Title")
        .description("Find a lab by its title.")
        .input_schema(json!({
            "type": "object",
            "properties": {
                "title": { "type": "string", "description": "Lab title" }
            },
            "required": ["title"]
        }))
        .category(ToolCategory::Read)
        .build(get_cml_lab_by_title_handler)
}

async fn get_cml_lab_by_title_handler(ctx: ToolContext, params: Value) -> ToolResult {
    let params: LabByTitleParams = parse_params(params)?;
    let client = ctx.client()?;

    let labs = match all_labs(&client).await {
        Ok(labs) => labs,
        Err(err) => return backend_failure("finding lab by title", err),
    };
    match labs
        .iter()
        .find(|lab| lab.get("lab_title").and_then(Value::as_str) == Some(params.title.as_str()))
    {
        Some(lab) => json_result(lab),
        None => Ok(ToolsCallResult::error(format!(
            "Lab with title {} not found",
            params.title
        ))),
    }
}

// ============================================================================
// create_empty_lab / modify_cml_lab
// ============================================================================

fn lab_fields_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "title": { "type": "string", "description": "Lab title" },
            "description": { "type": "string" },
            "notes": { "type": "string", "description": "Markdown notes" }
        }
    })
}

fn create_empty_lab_tool() -> RegisteredTool {
    ToolBuilder::new("create_empty_lab")
        .title("Create an Empty Lab")
        .description("Create an empty lab. Returns the new lab UUID.")
        .input_schema(json!({
            "type": "object",
            "properties": { "lab": lab_fields_schema() }
        }))
        .category(ToolCategory::Write)
        .build(create_empty_lab_handler)
}

async fn create_empty_lab_handler(ctx: ToolContext, params: Value) -> ToolResult {
    let lab = match params.get("lab").cloned() {
        Some(lab) => object_arg(lab)?,
        None => json!({}),
    };

    run(&ctx, "creating lab", |client| async move {
        let created = client.post("/labs", &lab).await?;
        Ok::<_, LabClientError>(created.and_then(|c| c.get("id").cloned()))
    })
    .await
}

fn modify_cml_lab_tool() -> RegisteredTool {
    ToolBuilder::new("modify_cml_lab")
        .title("Modify CML Lab Properties")
        .description("Update a lab's title, description or notes.")
        .input_schema(json!({
            "type": "object",
            "properties": {
                "lid": { "type": "string", "description": "Lab UUID" },
                "lab": lab_fields_schema()
            },
            "required": ["lid", "lab"]
        }))
        .category(ToolCategory::Write)
        .idempotent()
        .build(modify_cml_lab_handler)
}

async fn modify_cml_lab_handler(ctx: ToolContext, params: Value) -> ToolResult {
    let lab = object_arg(params.get("lab").cloned().unwrap_or(Value::Null))?;
    let params: LabParams = parse_params(params)?;

    run(&ctx, "modifying lab", |client| async move {
        client
            .patch(&format!("/labs/{}", segment(&params.lid)), &lab)
            .await?;
        Ok::<_, LabClientError>(true)
    })
    .await
}

// ============================================================================
// Lifecycle
// ============================================================================

#[derive(Debug, Deserialize)]
struct StartLabParams {
    lid: String,
    #[serde(default)]
    wait_for_convergence: bool,
}

fn start_cml_lab_tool() -> RegisteredTool {
    ToolBuilder::new("start_cml_lab")
        .title("Start a CML Lab")
        .description(
            "Start a lab. Set wait_for_convergence to wait until all nodes reach a stable state.",
        )
        .input_schema(json!({
            "type": "object",
            "properties": {
                "lid": { "type": "string", "description": "Lab UUID" },
                "wait_for_convergence": { "type": "boolean", "default": false }
            },
            "required": ["lid"]
        }))
        .category(ToolCategory::Write)
        .idempotent()
        .build(start_cml_lab_handler)
}

async fn start_cml_lab_handler(ctx: ToolContext, params: Value) -> ToolResult {
    let params: StartLabParams = parse_params(params)?;
    let client = ctx.client()?;
    let lid = segment(&params.lid);

    if let Err(err) = client.put(&format!("/labs/{}/start", lid)).await {
        return backend_failure("starting lab", err);
    }
    if params.wait_for_convergence {
        let path = format!("/labs/{}/check_if_converged", lid);
        match wait_for_convergence(&client, &path).await {
            Ok(true) => {}
            Ok(false) => {
                return Ok(ToolsCallResult::error(format!(
                    "Lab {} did not converge within {} seconds",
                    params.lid,
                    CONVERGENCE_TIMEOUT.as_secs()
                )))
            }
            Err(err) => return backend_failure("waiting for lab convergence", err),
        }
    }
    json_result(&true)
}

/// Poll `path` until it reports convergence or the timeout elapses.
async fn wait_for_convergence(
    client: &LabClient,
    path: &str,
) -> Result<bool, LabClientError> {
    let deadline = tokio::time::Instant::now() + CONVERGENCE_TIMEOUT;
    loop {
        let converged = client.get(path).await?;
        if converged.as_ref().and_then(Value::as_bool).unwrap_or(false) {
            return Ok(true);
        }
        if tokio::time::Instant::now() + CONVERGENCE_POLL_INTERVAL > deadline {
            return Ok(false);
        }
        tokio::time::sleep(CONVERGENCE_POLL_INTERVAL).await;
    }
}

fn stop_cml_lab_tool() -> RegisteredTool {
    ToolBuilder::new("stop_cml_lab")
        .title("Stop a CML Lab")
        .description("Stop a lab and all of its running nodes.")
        .input_schema(lab_id_schema())
        .category(ToolCategory::Write)
        .idempotent()
        .build(|ctx, params| lab_action(ctx, params, "stopping lab", &["stop"], false))
}

fn wipe_cml_lab_tool() -> RegisteredTool {
    ToolBuilder::new("wipe_cml_lab")
        .title("Wipe a CML Lab")
        .description(
            "Wipe a lab, erasing all node data and configuration. Always confirm with the user first.",
        )
        .input_schema(lab_id_schema())
        .category(ToolCategory::Destructive)
        .idempotent()
        .build(|ctx, params| lab_action(ctx, params, "wiping lab", &["wipe"], false))
}

fn delete_cml_lab_tool() -> RegisteredTool {
    ToolBuilder::new("delete_cml_lab")
        .title("Delete a CML Lab")
        .description(
            "Delete a lab, stopping and wiping it first. Always confirm with the user first.",
        )
        .input_schema(lab_id_schema())
        .category(ToolCategory::Destructive)
        .build(|ctx, params| lab_action(ctx, params, "deleting lab", &["stop", "wipe"], true))
}

/// PUT each of `steps` on the lab, then optionally DELETE it.
async fn lab_action(
    ctx: ToolContext,
    params: Value,
    action: &'static str,
    steps: &'static [&'static str],
    delete: bool,
) -> ToolResult {
    let params: LabParams = parse_params(params)?;
    let lab_path = format!("/labs/{}", segment(&params.lid));

    run(&ctx, action, |client| async move {
        for step in steps {
            client.put(&format!("{}/{}", lab_path, step)).await?;
        }
        if delete {
            client.delete(&lab_path).await?;
        }
        Ok::<_, LabClientError>(true)
    })
    .await
}

// ============================================================================
// Topology export
// ============================================================================

fn download_lab_topology_tool() -> RegisteredTool {
    ToolBuilder::new("download_lab_topology")
        .title("Download Lab Topology")
        .description(
            "Download a lab topology as YAML. Present it to the user as a YAML file for saving.",
        )
        .input_schema(lab_id_schema())
        .category(ToolCategory::Read)
        .build(download_lab_topology_handler)
}

async fn download_lab_topology_handler(ctx: ToolContext, params: Value) -> ToolResult {
    let params: LabParams = parse_params(params)?;
    let client = ctx.client()?;

    match client
        .get_text(&format!("/labs/{}/download", segment(&params.lid)))
        .await
    {
        Ok(topology) => Ok(ToolsCallResult::text(topology)),
        Err(err) => backend_failure("downloading lab topology", err),
    }
}

#[derive(Debug, Deserialize)]
struct CloneLabParams {
    lid: String,
    #[serde(default)]
    new_title: Option<String>,
}

fn clone_cml_lab_tool() -> RegisteredTool {
    ToolBuilder::new("clone_cml_lab")
        .title("Clone CML Lab")
        .description(
            "Clone a lab. The copy is titled new_title, or \"Copy of <title>\" when omitted. \
             Returns the new lab UUID.",
        )
        .input_schema(json!({
            "type": "object",
            "properties": {
                "lid": { "type": "string", "description": "Lab UUID" },
                "new_title": { "type": "string", "description": "Title of the copy" }
            },
            "required": ["lid"]
        }))
        .category(ToolCategory::Write)
        .build(clone_cml_lab_handler)
}

async fn clone_cml_lab_handler(ctx: ToolContext, params: Value) -> ToolResult {
    let params: CloneLabParams = parse_params(params)?;
    let client = ctx.client()?;
    let new_title = params.new_title.filter(|t| !t.is_empty());

    let exported = match client
        .get_text(&format!("/labs/{}/download", segment(&params.lid)))
        .await
    {
        Ok(exported) => exported,
        Err(err) => return backend_failure("downloading lab for clone", err),
    };
    let topology = match retitle_topology(&exported, new_title.as_deref()) {
        Ok(topology) => topology,
        Err(reason) => {
            return Ok(ToolsCallResult::error(format!(
                "Invalid topology for lab {}: {}",
                params.lid, reason
            )))
        }
    };

    match client.post("/import", &topology).await {
        Ok(created) => json_result(&created.and_then(|c| c.get("id").cloned())),
        Err(err) => backend_failure("cloning lab", err),
    }
}

/// Parse an exported YAML topology and give its lab a new title.
fn retitle_topology(exported: &str, new_title: Option<&str>) -> Result<Value, String> {
    let mut topology: Value = serde_yaml::from_str(exported).map_err(|e| e.to_string())?;
    let lab = topology
        .get_mut("lab")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| "missing lab section".to_string())?;

    let title = match new_title {
        Some(title) => title.to_string(),
        None => format!(
            "Copy of {}",
            lab.get("title").and_then(Value::as_str).unwrap_or_default()
        ),
    };
    lab.insert("title".to_string(), Value::String(title));
    Ok(topology)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPORTED: &str = "lab:\n  title: Alpha\n  version: 0.2.2\nnodes:\n  - id: n0\n    label: r1\n";

    #[test]
    fn test_retitle_defaults_to_copy_of() {
        let topology = retitle_topology(EXPORTED, None).unwrap();
        assert_eq!(topology["lab"]["title"], "Copy of Alpha");
        assert_eq!(topology["nodes"][0]["label"], "r1");
    }

    #[test]
    fn test_retitle_uses_new_title() {
        let topology = retitle_topology(EXPORTED, Some("Beta")).unwrap();
        assert_eq!(topology["lab"]["title"], "Beta");
        assert_eq!(topology["lab"]["version"], "0.2.2");
    }

    #[test]
    fn test_retitle_rejects_topology_without_lab() {
        assert!(retitle_topology("nodes: []\n", None).is_err());
        assert!(retitle_topology("[unclosed", None).is_err());
    }
}
