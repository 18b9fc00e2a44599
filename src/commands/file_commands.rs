//! Entry points for a transport layer. Store calls block on the filesystem,
//! so they run on the blocking pool; OCR runs under the request timeout.

use crate::error::AppError;
use crate::models::document_node::DocumentNode;
use crate::models::file_content::FileContent;
use crate::models::ocr::OcrCache;
use crate::models::operation::{OperationAck, OperationType};
use crate::services::file_service::DocumentStore;
use crate::state::AppState;

async fn with_store<T, F>(state: &AppState, f: F) -> Result<T, AppError>
where
    F: FnOnce(&DocumentStore) -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    let store = state.store.clone();
    tokio::task::spawn_blocking(move || f(&store)).await?
}

pub async fn list_directory(state: &AppState, path: String) -> Result<Vec<DocumentNode>, AppError> {
    with_store(state, move |store| store.list_children(&path)).await
}

pub async fn get_structure(state: &AppState) -> Result<DocumentNode, AppError> {
    with_store(state, |store| store.full_tree()).await
}

pub async fn get_file(state: &AppState, path: String) -> Result<FileContent, AppError> {
    with_store(state, move |store| store.read_document(&path)).await
}

pub async fn create_folder(state: &AppState, directory_path: String) -> Result<OperationAck, AppError> {
    let created = with_store(state, move |store| store.create_folder(&directory_path)).await?;
    Ok(OperationAck::new(OperationType::CreateFolder, vec![created]))
}

pub async fn copy_item(
    state: &AppState,
    selected_item: String,
    destination: String,
) -> Result<OperationAck, AppError> {
    let copied = with_store(state, move |store| {
        store.copy_document(&selected_item, &destination)
    })
    .await?;
    Ok(OperationAck::new(OperationType::Copy, copied))
}

pub async fn move_item(
    state: &AppState,
    selected_item: String,
    destination: String,
) -> Result<OperationAck, AppError> {
    let moved = with_store(state, move |store| {
        store.move_document(&selected_item, &destination)
    })
    .await?;
    Ok(OperationAck::new(OperationType::Move, moved))
}

pub async fn delete_item(state: &AppState, selected_item: String) -> Result<OperationAck, AppError> {
    let deleted = with_store(state, move |store| store.delete_document(&selected_item)).await?;
    Ok(OperationAck::new(OperationType::Delete, vec![deleted]))
}

pub async fn rename_item(
    state: &AppState,
    path: String,
    new_name: String,
) -> Result<OperationAck, AppError> {
    let renamed = with_store(state, move |store| store.rename_document(&path, &new_name)).await?;
    Ok(OperationAck::new(OperationType::Rename, vec![renamed]))
}

pub async fn upload_file(
    state: &AppState,
    path: String,
    file_name: String,
    content: Vec<u8>,
) -> Result<OperationAck, AppError> {
    let stored = with_store(state, move |store| {
        store.upload_document(&path, &file_name, &content)
    })
    .await?;
    Ok(OperationAck::new(OperationType::Upload, vec![stored]))
}

/// The provider call is abandoned, not cancelled, when the timeout fires.
pub async fn get_ocr(
    state: &AppState,
    path: String,
    height: u32,
    width: u32,
) -> Result<OcrCache, AppError> {
    let timeout = state.config.ocr.request_timeout();
    tokio::time::timeout(timeout, state.ocr.get_or_create(&path, height, width))
        .await
        .map_err(|_| {
            tracing::warn!(path = %path, timeout_secs = timeout.as_secs(), "OCR request timed out");
            AppError::ExternalService(format!(
                "OCR request timed out after {}s",
                timeout.as_secs()
            ))
        })?
}
