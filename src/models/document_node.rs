use serde::{Deserialize, Serialize};

/// One entry of a listing or of the full tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentNode {
    pub name: String,
    pub path: String,
    pub is_directory: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<DocumentNode>>,
}

impl DocumentNode {
    pub fn file(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            is_directory: false,
            children: None,
        }
    }

    /// A directory whose children have not been loaded.
    pub fn directory(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            is_directory: true,
            children: None,
        }
    }

    pub fn expanded(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            children: Some(Vec::new()),
            ..Self::directory(name, path)
        }
    }
}
