pub mod document_node;
pub mod file_content;
pub mod ocr;
pub mod operation;
pub mod search;
