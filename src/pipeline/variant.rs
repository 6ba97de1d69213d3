use crate::transform::Colormap;

/// Cyclic cursor over a fixed, non-empty list of colormaps
#[derive(Debug, Clone)]
pub struct VariantSelector {
    variants: Vec<Colormap>,
    index: usize,
}

impl VariantSelector {
    /// Returns `None` for an empty list
    pub fn new(variants: Vec<Colormap>) -> Option<Self> {
        if variants.is_empty() {
            return None;
        }
        Some(Self { variants, index: 0 })
    }

    pub fn current(&self) -> Colormap {
        self.variants[self.index]
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    /// Move to the next variant, wrapping around, and return it
    pub fn advance(&mut self) -> Colormap {
        self.index = (self.index + 1) % self.variants.len();
        self.current()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.variants.iter().map(|v| v.name()).collect()
    }
}

impl Default for VariantSelector {
    fn default() -> Self {
        Self {
            variants: Colormap::ALL.to_vec(),
            index: 0,
        }
    }
}
