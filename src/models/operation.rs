use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Copy,
    Move,
    Rename,
    Delete,
    CreateFolder,
    Upload,
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Copy => write!(f, "copy"),
            Self::Move => write!(f, "move"),
            Self::Rename => write!(f, "rename"),
            Self::Delete => write!(f, "delete"),
            Self::CreateFolder => write!(f, "create_folder"),
            Self::Upload => write!(f, "upload"),
        }
    }
}

/// Acknowledgement returned for every mutating store call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationAck {
    pub operation: OperationType,
    pub affected_paths: Vec<String>,
    pub executed_at: String,
}

impl OperationAck {
    pub fn new(operation: OperationType, affected_paths: Vec<String>) -> Self {
        Self {
            operation,
            affected_paths,
            executed_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}
