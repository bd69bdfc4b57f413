//! # Tessera MCP Server
//!
//! `ServerHandler` exposing five tools that proxy to the Tessera HTTP API.

use crate::client::TesseraClient;
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    schemars, tool, tool_handler, tool_router,
};
use serde::Deserialize;
use serde_json::Value;

// =============================================================================
// MCP SERVER
// =============================================================================

#[derive(Clone)]
pub struct TesseraMcp {
    client: TesseraClient,
    #[allow(dead_code)]
    tool_router: ToolRouter<Self>,
}

// =============================================================================
// TOOL PARAMETER STRUCTS
// =============================================================================

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct StoreParams {
    #[schemars(description = "Subject entity name, e.g. 'billing-service'")]
    pub subject: String,
    #[schemars(description = "Relation, e.g. 'uses', 'depends_on', 'todo'")]
    pub predicate: String,
    #[schemars(description = "Object entity name, e.g. 'postgres'")]
    pub object: String,
    #[schemars(description = "Free-text description of the fact (defaults to the triple)")]
    pub content: Option<String>,
    #[schemars(description = "Where or why the fact applies")]
    pub context: Option<String>,
    #[schemars(description = "Origin of the fact, e.g. a file path or URL")]
    pub source: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SearchParams {
    #[schemars(description = "Natural-language query")]
    pub query: String,
    #[schemars(description = "Maximum results (default: 5, max: 50)")]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct GraphParams {
    #[schemars(description = "Entity name; case-insensitive partial matches are accepted")]
    pub entity: String,
    #[schemars(description = "Traversal depth (default: 2, max: 5)")]
    pub depth: Option<usize>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ListParams {
    #[schemars(description = "Optional case-insensitive name filter")]
    pub pattern: Option<String>,
}

// =============================================================================
// TOOL IMPLEMENTATIONS
// =============================================================================

fn internal(e: impl std::fmt::Display) -> McpError {
    McpError::internal_error(e.to_string(), None)
}

fn text(body: String) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::success(vec![Content::text(body)]))
}

#[tool_router]
impl TesseraMcp {
    pub fn new(client: TesseraClient) -> Self {
        Self {
            client,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Record a fact (subject, predicate, object) in the knowledge graph")]
    async fn tessera_store(
        &self,
        params: Parameters<StoreParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let body = serde_json::json!({
            "subject": p.subject,
            "predicate": p.predicate,
            "object": p.object,
            "content": p.content.unwrap_or_default(),
            "context": p.context.unwrap_or_default(),
            "source": p.source.unwrap_or_default(),
        });
        let resp = self.client.store(&body).await.map_err(internal)?;
        text(format_store_response(&resp))
    }

    #[tool(description = "Semantic search over stored facts, most similar first")]
    async fn tessera_search(
        &self,
        params: Parameters<SearchParams>,
    ) -> Result<CallToolResult, McpError> {
        let resp = self
            .client
            .search(&params.0.query, params.0.limit)
            .await
            .map_err(internal)?;
        text(format_search_response(&resp))
    }

    #[tool(description = "Show entities and facts connected to an entity")]
    async fn tessera_graph(
        &self,
        params: Parameters<GraphParams>,
    ) -> Result<CallToolResult, McpError> {
        let resp = self
            .client
            .graph(&params.0.entity, params.0.depth)
            .await
            .map_err(internal)?;
        text(format_graph_response(&params.0.entity, &resp))
    }

    #[tool(description = "List known entities with their fact counts")]
    async fn tessera_list(
        &self,
        params: Parameters<ListParams>,
    ) -> Result<CallToolResult, McpError> {
        let resp = self
            .client
            .entities(params.0.pattern.as_deref())
            .await
            .map_err(internal)?;
        text(format_list_response(&resp))
    }

    #[tool(description = "Get store statistics (entities, facts, promotion candidates)")]
    async fn tessera_status(&self) -> Result<CallToolResult, McpError> {
        let resp = self.client.status().await.map_err(internal)?;
        text(format_status_response(&resp))
    }
}

// =============================================================================
// SERVER HANDLER
// =============================================================================

#[tool_handler]
impl ServerHandler for TesseraMcp {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Tessera knowledge graph. Store facts about the codebase as \
                 subject-predicate-object triples, search them by meaning, and \
                 explore how entities connect."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

// =============================================================================
// RESPONSE FORMATTING
// =============================================================================

fn str_field<'a>(v: &'a Value, key: &str) -> &'a str {
    v.get(key).and_then(Value::as_str).unwrap_or("")
}

/// `Some(message)` when the API reported a failure.
fn failure(resp: &Value) -> Option<String> {
    let ok = resp.get("success").and_then(Value::as_bool).unwrap_or(true);
    (!ok).then(|| {
        let msg = str_field(resp, "error");
        if msg.is_empty() {
            "request failed".to_string()
        } else {
            msg.to_string()
        }
    })
}

fn triple(v: &Value) -> String {
    format!(
        "{} -[{}]-> {}",
        str_field(v, "subject"),
        str_field(v, "predicate"),
        str_field(v, "object")
    )
}

fn format_store_response(resp: &Value) -> String {
    if let Some(err) = failure(resp) {
        return err;
    }
    match resp.get("stored") {
        Some(stored) => format!("Stored: {}", triple(stored)),
        None => format!("Store response: {resp}"),
    }
}

fn format_search_response(resp: &Value) -> String {
    if let Some(err) = failure(resp) {
        return err;
    }
    let hits = resp
        .get("hits")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    if hits.is_empty() {
        return "No facts found.".to_string();
    }
    let mut lines = Vec::with_capacity(hits.len());
    for (i, hit) in hits.iter().enumerate() {
        let score = hit.get("score").and_then(Value::as_f64).unwrap_or(0.0);
        let mut line = format!("{}. [{score:.3}] {}", i + 1, triple(hit));
        let content = str_field(hit, "content");
        if !content.is_empty() {
            line.push_str(&format!("\n   {content}"));
        }
        let context = str_field(hit, "context");
        if !context.is_empty() {
            line.push_str(&format!("\n   context: {context}"));
        }
        if let Some(layer) = hit.get("layer").and_then(Value::as_str) {
            line.push_str(&format!("\n   layer: {layer}"));
        }
        lines.push(line);
    }
    lines.join("\n")
}

fn format_graph_response(query: &str, resp: &Value) -> String {
    if let Some(err) = failure(resp) {
        return err;
    }
    let Some(graph) = resp.get("graph").filter(|g| !g.is_null()) else {
        return format!("No entity matches '{query}'.");
    };
    let mut parts = vec![format!("Entity: {}", str_field(graph, "matched"))];

    if let Some(connected) = graph.get("connected").and_then(Value::as_array)
        && !connected.is_empty()
    {
        let names: Vec<&str> = connected.iter().filter_map(Value::as_str).collect();
        parts.push(format!("Connected: {}", names.join(", ")));
    }

    let facts = graph
        .get("facts")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    parts.push(format!("Facts ({}):", facts.len()));
    for fact in facts {
        parts.push(format!("  {}", triple(fact)));
    }
    parts.join("\n")
}

fn format_list_response(resp: &Value) -> String {
    if let Some(err) = failure(resp) {
        return err;
    }
    let entities = resp
        .get("entities")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    if entities.is_empty() {
        return "No entities.".to_string();
    }
    entities
        .iter()
        .map(|e| {
            let count = e.get("fact_count").and_then(Value::as_u64).unwrap_or(0);
            format!("{} ({count} facts)", str_field(e, "name"))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_status_response(resp: &Value) -> String {
    if let Some(err) = failure(resp) {
        return err;
    }
    let count = |key: &str| resp.get(key).and_then(Value::as_u64).unwrap_or(0);
    format!(
        "Tessera Status ({}):\n  Entities: {}\n  Facts: {}\n  Candidates: {}\n  Dimension: {}",
        str_field(resp, "mode"),
        count("entity_count"),
        count("fact_count"),
        count("candidate_count"),
        count("dimension"),
    )
}
