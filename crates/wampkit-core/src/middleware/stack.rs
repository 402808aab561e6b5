//! Ordered assembly of pipeline stages

use super::BoxedMiddleware;

/// Something that wraps an inner stage into a new stage
pub trait MiddlewareLayer: Send {
    /// Wrap `inner`, returning the combined stage
    fn wrap(self: Box<Self>, inner: BoxedMiddleware) -> BoxedMiddleware;
}

impl<F> MiddlewareLayer for F
where
    F: FnOnce(BoxedMiddleware) -> BoxedMiddleware + Send,
{
    fn wrap(self: Box<Self>, inner: BoxedMiddleware) -> BoxedMiddleware {
        (*self)(inner)
    }
}

/// A stack of middleware layers
#[derive(Default)]
pub struct MiddlewareStack {
    layers: Vec<Box<dyn MiddlewareLayer>>,
}

impl MiddlewareStack {
    /// Create a new empty stack
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    /// Add a layer to the stack
    ///
    /// Layers see events in the order they are added (outermost first).
    pub fn push<L>(&mut self, layer: L)
    where
        L: MiddlewareLayer + 'static,
    {
        self.layers.push(Box::new(layer));
    }

    /// Add a layer, builder style
    pub fn layer<L>(mut self, layer: L) -> Self
    where
        L: MiddlewareLayer + 'static,
    {
        self.push(layer);
        self
    }

    /// Add a layer to the beginning of the stack
    ///
    /// This layer will see events first (outermost).
    pub fn prepend<L>(&mut self, layer: L)
    where
        L: MiddlewareLayer + 'static,
    {
        self.layers.insert(0, Box::new(layer));
    }

    /// Check if the stack is empty
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Get the number of layers
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Fold the layers around the terminal stage, returning the outermost stage
    pub fn build(self, terminal: BoxedMiddleware) -> BoxedMiddleware {
        // Build the chain from inside out
        self.layers
            .into_iter()
            .rev()
            .fold(terminal, |inner, layer| layer.wrap(inner))
    }
}
