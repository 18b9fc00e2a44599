pub mod document;
pub mod file_service;
pub mod ocr_client;
pub mod ocr_service;
pub mod search_service;
