//! Template rendering boundary.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::MigrateResult;

/// Variables handed to a renderer.
pub type RenderContext = BTreeMap<String, String>;

/// Turns a file on disk into literal SQL text.
///
/// The engine treats the output as opaque: it is checksummed and executed
/// as-is.
#[async_trait::async_trait]
pub trait Renderer: Send + Sync {
    /// Render the file at `path`.
    async fn render(&self, path: &Path, context: &RenderContext) -> MigrateResult<String>;
}

/// Returns file content verbatim.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainRenderer;

#[async_trait::async_trait]
impl Renderer for PlainRenderer {
    async fn render(&self, path: &Path, _context: &RenderContext) -> MigrateResult<String> {
        Ok(tokio::fs::read_to_string(path).await?)
    }
}
