use std::collections::HashMap;
use std::sync::Arc;

use crate::filter::descriptor::ExtensionParams;
use crate::foundation::error::{PixelflowError, PixelflowResult};
use crate::pixel::buffer::PixelBuffer;

/// Externally provided image filter.
///
/// Called synchronously on a pipeline worker. When both inputs are given they have the same size.
pub trait ImageFilterExtension: Send + Sync {
    /// Produce the filtered image.
    fn process_image(
        &self,
        source: Option<&PixelBuffer>,
        destination: Option<&PixelBuffer>,
        params: &ExtensionParams,
    ) -> PixelflowResult<PixelBuffer>;
}

impl<F> ImageFilterExtension for F
where
    F: Fn(Option<&PixelBuffer>, Option<&PixelBuffer>, &ExtensionParams) -> PixelflowResult<PixelBuffer>
        + Send
        + Sync,
{
    fn process_image(
        &self,
        source: Option<&PixelBuffer>,
        destination: Option<&PixelBuffer>,
        params: &ExtensionParams,
    ) -> PixelflowResult<PixelBuffer> {
        self(source, destination, params)
    }
}

/// Extension handlers keyed by `(uri, name)`.
#[derive(Clone, Default)]
pub struct ExtensionRegistry {
    handlers: HashMap<(String, String), Arc<dyn ImageFilterExtension>>,
}

impl std::fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.handlers.keys().collect();
        keys.sort();
        f.debug_struct("ExtensionRegistry")
            .field("handlers", &keys)
            .finish()
    }
}

impl ExtensionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler`, replacing any previous handler for the same key.
    pub fn register(
        &mut self,
        uri: impl Into<String>,
        name: impl Into<String>,
        handler: Arc<dyn ImageFilterExtension>,
    ) -> &mut Self {
        self.handlers.insert((uri.into(), name.into()), handler);
        self
    }

    /// Look up a handler.
    pub fn get(&self, uri: &str, name: &str) -> Option<&Arc<dyn ImageFilterExtension>> {
        self.handlers.get(&(uri.to_owned(), name.to_owned()))
    }

    /// Look up a handler, failing with an evaluation error when none is registered.
    pub fn resolve(&self, uri: &str, name: &str) -> PixelflowResult<&Arc<dyn ImageFilterExtension>> {
        self.get(uri, name).ok_or_else(|| {
            PixelflowError::evaluation(format!("no extension filter registered for {uri}#{name}"))
        })
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/filter/extension.rs"]
mod tests;
