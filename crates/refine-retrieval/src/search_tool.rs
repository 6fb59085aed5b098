use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use refine_core::ids::SessionId;
use refine_core::tools::{Tool, ToolContext, ToolError, ToolResult};
use refine_store::StoreError;

use crate::builder::ContextBuilder;
use crate::errors::RetrievalError;

pub const TOOL_NAME: &str = "search_paper_fragments";

#[derive(Deserialize)]
struct SearchArgs {
    paper_id: String,
    query: String,
}

/// Evidence lookup over one subsection's documents. Bound to a session and
/// the ids the subsection may cite; any other id is refused.
pub struct SearchPaperFragments {
    builder: Arc<ContextBuilder>,
    session_id: SessionId,
    allowed: Vec<String>,
}

impl SearchPaperFragments {
    pub fn new(builder: Arc<ContextBuilder>, session_id: SessionId, allowed: Vec<String>) -> Self {
        Self {
            builder,
            session_id,
            allowed,
        }
    }

    fn available(&self) -> String {
        if self.allowed.is_empty() {
            "none".to_string()
        } else {
            self.allowed.join(", ")
        }
    }
}

#[async_trait]
impl Tool for SearchPaperFragments {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Search a cited paper for text fragments relevant to a query. Use it to find \
         supporting evidence before making or fixing a claim. Only the papers assigned to \
         this subsection can be searched."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "paper_id": {
                    "type": "string",
                    "description": "ID of the paper to search",
                    "enum": self.allowed,
                },
                "query": {
                    "type": "string",
                    "description": "What to look for in the paper"
                }
            },
            "required": ["paper_id", "query"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        if ctx.cancel.is_cancelled() {
            return Err(ToolError::Cancelled);
        }
        let args: SearchArgs =
            serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        if args.query.trim().is_empty() {
            return Err(ToolError::InvalidArguments("query must not be empty".into()));
        }

        if !self.allowed.iter().any(|id| *id == args.paper_id) {
            warn!(doc_id = %args.paper_id, "search refused for paper outside the subsection");
            return Ok(ToolResult::error(format!(
                "Error: Paper '{}' is not available for this subsection. Available papers: {}",
                args.paper_id,
                self.available()
            )));
        }

        let hits = match self
            .builder
            .search(&self.session_id, &args.paper_id, &args.query, self.builder.top_k())
            .await
        {
            Ok(hits) => hits,
            Err(RetrievalError::Store(StoreError::NotFound(_))) => {
                return Ok(ToolResult::error(format!(
                    "Error: Could not load vector store for paper '{}'",
                    args.paper_id
                )));
            }
            Err(e) => return Err(ToolError::ExecutionFailed(e.to_string())),
        };

        if hits.is_empty() {
            return Ok(ToolResult::text(format!(
                "No relevant fragments found for query: '{}'",
                args.query
            )));
        }
        info!(doc_id = %args.paper_id, fragments = hits.len(), "fragments found");
        let body = hits
            .iter()
            .enumerate()
            .map(|(i, hit)| format!("Fragment {}:\n{}", i + 1, hit.text))
            .collect::<Vec<_>>()
            .join("\n\n");
        Ok(ToolResult::text(body))
    }
}
