use std::sync::Arc;

use crate::error::AppError;
use crate::models::ocr::{OcrCache, Page, Rectangle, TextBox};
use crate::scope_path::ScopedRoot;
use crate::services::document::{Document, DocumentLayout};
use crate::services::ocr_client::{AnalyzedDocument, AnalyzedPage, OcrClient};

/// Fixed correction between the provider's page units and the target
/// rendering resolution.
pub const PROVIDER_SCALE_CORRECTION: f64 = 2.0;

/// Returns cached OCR results, asking the provider only when a document has
/// no sidecar yet.
///
/// An existing sidecar is trusted unconditionally: it is never invalidated,
/// not when the primary changes and not when a caller asks for different
/// target dimensions than the ones it was generated for.
#[derive(Clone)]
pub struct OcrService {
    root: ScopedRoot,
    layout: DocumentLayout,
    client: Arc<dyn OcrClient>,
}

impl OcrService {
    pub fn new(root: ScopedRoot, layout: DocumentLayout, client: Arc<dyn OcrClient>) -> Self {
        Self {
            root,
            layout,
            client,
        }
    }

    pub async fn get_or_create(
        &self,
        path: &str,
        target_height: u32,
        target_width: u32,
    ) -> Result<OcrCache, AppError> {
        let doc = self.layout.locate(&self.root.resolve(path)?);

        if doc.has_sidecar() {
            tracing::debug!(path = %doc.primary().relative, "OCR cache hit");
            return load_sidecar(doc).await;
        }

        if !doc.exists() {
            return Err(AppError::NotFound(doc.primary().relative.clone()));
        }
        if target_height == 0 || target_width == 0 {
            return Err(AppError::InvalidArgument(format!(
                "target dimensions must be positive, got {target_width}x{target_height}"
            )));
        }

        tracing::info!(path = %doc.primary().relative, "OCR cache miss");
        let content = tokio::fs::read(&doc.primary().absolute)
            .await
            .map_err(|e| AppError::from_io(e, &doc.primary().relative))?;
        let analyzed = self.client.analyze(doc.primary().name(), content).await?;

        let cache = build_cache(
            &doc.primary().relative,
            &analyzed,
            target_height,
            target_width,
        )?;
        store_sidecar(doc.clone(), cache.clone()).await?;

        tracing::info!(
            path = %doc.primary().relative,
            pages = cache.pages.len(),
            "OCR result cached"
        );
        Ok(cache)
    }
}

async fn load_sidecar(doc: Document) -> Result<OcrCache, AppError> {
    tokio::task::spawn_blocking(move || doc.read_sidecar()).await?
}

async fn store_sidecar(doc: Document, cache: OcrCache) -> Result<(), AppError> {
    tokio::task::spawn_blocking(move || doc.write_sidecar(&cache)).await?
}

/// Converts provider output into the sidecar shape, scaled to the target size.
pub fn build_cache(
    primary_path: &str,
    analyzed: &AnalyzedDocument,
    target_height: u32,
    target_width: u32,
) -> Result<OcrCache, AppError> {
    let pages = analyzed
        .pages
        .iter()
        .map(|page| convert_page(page, target_height, target_width))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(OcrCache {
        path: primary_path.to_string(),
        pages,
    })
}

fn convert_page(
    page: &AnalyzedPage,
    target_height: u32,
    target_width: u32,
) -> Result<Page, AppError> {
    if !(page.width > 0.0 && page.height > 0.0) {
        return Err(AppError::ExternalService(format!(
            "page {} has invalid size {}x{}",
            page.page_number, page.width, page.height
        )));
    }
    let (scale_x, scale_y) = scale_factors(
        target_width,
        target_height,
        page.width,
        page.height,
    );

    let boxes = page
        .lines
        .iter()
        .map(|line| {
            Ok(TextBox {
                text: line.content.clone(),
                rectangle: bounding_rectangle(&line.polygon, scale_x, scale_y)?,
            })
        })
        .collect::<Result<Vec<_>, AppError>>()?;

    Ok(Page {
        page_number: page.page_number,
        boxes,
    })
}

pub fn scale_factors(
    target_width: u32,
    target_height: u32,
    page_width: f64,
    page_height: f64,
) -> (f64, f64) {
    (
        f64::from(target_width) / page_width * PROVIDER_SCALE_CORRECTION,
        f64::from(target_height) / page_height * PROVIDER_SCALE_CORRECTION,
    )
}

/// Axis-aligned bounds of a flat `x, y, x, y, ...` polygon after scaling x and
/// y independently.
pub fn bounding_rectangle(polygon: &[f64], scale_x: f64, scale_y: f64) -> Result<Rectangle, AppError> {
    if polygon.len() % 2 != 0 {
        return Err(AppError::InvalidArgument(format!(
            "polygon has an odd number of coordinates ({})",
            polygon.len()
        )));
    }
    if polygon.is_empty() {
        return Ok(Rectangle::default());
    }

    let mut min_x = f64::INFINITY;
    let mut min_y = f64::INFINITY;
    let mut max_x = f64::NEG_INFINITY;
    let mut max_y = f64::NEG_INFINITY;
    for point in polygon.chunks_exact(2) {
        let x = point[0] * scale_x;
        let y = point[1] * scale_y;
        min_x = min_x.min(x);
        max_x = max_x.max(x);
        min_y = min_y.min(y);
        max_y = max_y.max(y);
    }

    Ok(Rectangle {
        x: min_x,
        y: min_y,
        width: max_x - min_x,
        height: max_y - min_y,
    })
}
