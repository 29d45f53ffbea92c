/// Errors that end a dispatch without an answer.
///
/// The fallback reply is only for "the model chose no tool"; every failure
/// below surfaces to the caller instead, and no history is written.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Query must not be empty")]
    EmptyQuery,

    #[error("Model decision failed: {cause:#}")]
    Decision { cause: anyhow::Error },

    #[error("Tool '{tool}' failed: {cause:#}")]
    ToolBackend { tool: String, cause: anyhow::Error },
}

impl DispatchError {
    /// HTTP status code the server answers with.
    pub fn status_code(&self) -> u16 {
        match self {
            DispatchError::EmptyQuery => 422,
            DispatchError::Decision { .. } | DispatchError::ToolBackend { .. } => 500,
        }
    }

    /// Detail safe to show a caller; the cause chain is only logged.
    pub fn public_detail(&self) -> String {
        match self {
            DispatchError::EmptyQuery => self.to_string(),
            DispatchError::Decision { .. } => "The model could not process the query".to_string(),
            DispatchError::ToolBackend { tool, .. } => format!("Tool '{tool}' is unavailable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detail_is_redacted() {
        let err = DispatchError::Decision {
            cause: anyhow::anyhow!("connect to http://10.0.0.3:11434 refused"),
        };
        assert_eq!(err.status_code(), 500);
        assert!(err.to_string().contains("10.0.0.3"));
        assert!(!err.public_detail().contains("10.0.0.3"));
    }

    #[test]
    fn test_tool_error_names_tool() {
        let err = DispatchError::ToolBackend {
            tool: "query_faq_database".into(),
            cause: anyhow::anyhow!("timeout").context("MCP request failed"),
        };
        assert_eq!(err.to_string(), "Tool 'query_faq_database' failed: MCP request failed: timeout");
        assert_eq!(err.public_detail(), "Tool 'query_faq_database' is unavailable");
        assert_eq!(DispatchError::EmptyQuery.status_code(), 422);
    }
}
