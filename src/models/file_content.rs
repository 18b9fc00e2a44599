/// Raw bytes of a primary file, ready to be served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}
