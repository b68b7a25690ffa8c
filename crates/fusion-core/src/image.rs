//! Prepared input images.

use std::sync::Arc;

use crate::{FusionError, Result, RgbImage};

/// An image after resizing and cropping, ready for pairwise inference.
#[derive(Debug, Clone)]
pub struct InputImage {
    /// Zero-based index into the [`ImageSet`].
    pub id: usize,
    /// File name (or synthetic label) the image was loaded from.
    pub name: String,
    /// Pixels in `[0, 1]`.
    pub rgb: Arc<RgbImage>,
    /// Size of the source file before resizing, `(width, height)`.
    pub original_size: (usize, usize),
}

impl InputImage {
    pub fn new(id: usize, name: impl Into<String>, rgb: RgbImage) -> Self {
        let original_size = rgb.shape();
        Self {
            id,
            name: name.into(),
            rgb: Arc::new(rgb),
            original_size,
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.rgb.width()
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.rgb.height()
    }
}

/// Ordered, non-empty collection of input images whose ids equal their index.
#[derive(Debug, Clone)]
pub struct ImageSet {
    images: Vec<InputImage>,
}

impl ImageSet {
    pub fn new(images: Vec<InputImage>) -> Result<Self> {
        if images.is_empty() {
            return Err(FusionError::input("image set is empty"));
        }
        for (i, img) in images.iter().enumerate() {
            if img.id != i {
                return Err(FusionError::input(format!(
                    "image '{}' has id {} at position {i}",
                    img.name, img.id
                )));
            }
            if img.rgb.is_empty() {
                return Err(FusionError::input(format!("image '{}' has no pixels", img.name)));
            }
        }
        Ok(Self { images })
    }

    /// Duplicate a lone image so pairwise inference has a pair to work on.
    ///
    /// The copy keeps the name and pixels but receives the next id. Returns
    /// `true` when a copy was added.
    pub fn ensure_pair(&mut self) -> bool {
        if self.images.len() != 1 {
            return false;
        }
        let mut copy = self.images[0].clone();
        copy.id = 1;
        log::debug!("single input image '{}': duplicating it", self.images[0].name);
        self.images.push(copy);
        true
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn get(&self, id: usize) -> Option<&InputImage> {
        self.images.get(id)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, InputImage> {
        self.images.iter()
    }

    pub fn as_slice(&self) -> &[InputImage] {
        &self.images
    }

    pub fn names(&self) -> Vec<String> {
        self.images.iter().map(|img| img.name.clone()).collect()
    }
}
