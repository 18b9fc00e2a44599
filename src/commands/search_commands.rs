use crate::error::AppError;
use crate::models::search::{FileResults, SearchResult};
use crate::state::AppState;

pub async fn search(state: &AppState, query: String) -> Result<Vec<FileResults>, AppError> {
    let search = state.search.clone();
    tokio::task::spawn_blocking(move || search.search(&query)).await?
}

pub async fn search_file(
    state: &AppState,
    query: String,
    file_name: String,
) -> Result<Vec<SearchResult>, AppError> {
    let search = state.search.clone();
    tokio::task::spawn_blocking(move || search.search_in_file(&query, &file_name)).await?
}
