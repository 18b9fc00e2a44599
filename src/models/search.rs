use serde::{Deserialize, Serialize};

/// One matching box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub file_path: String,
    pub page_number: u32,
    pub matched_text: String,
    /// Character offset of the box within the page's texts joined by single spaces.
    pub match_index: usize,
    /// Position of the box among all boxes of the page.
    pub box_index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileResults {
    pub query: String,
    pub file_path: String,
    pub occurrence_count: usize,
}
