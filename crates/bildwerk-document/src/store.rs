// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image store — the seam between the core and whatever keeps raster files.

use std::collections::HashMap;

use bildwerk_core::error::{BildwerkError, Result};
use bildwerk_core::ImageMime;
use image::DynamicImage;

/// Loads rasters referenced by the page model and persists new ones.
pub trait ImageStore {
    /// Load the raster stored under `filename` (as recorded in the model).
    fn load(&self, filename: &str) -> Result<DynamicImage>;

    /// Persist `image` under the identifier `id` and return the filename to
    /// record in the model.
    fn save(
        &mut self,
        id: &str,
        image: &DynamicImage,
        mime: ImageMime,
        page_id: Option<&str>,
    ) -> Result<String>;
}

/// Keeps every raster in memory. Useful for tests and benchmarks.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    images: HashMap<String, DynamicImage>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an image under an explicit filename.
    pub fn insert(&mut self, filename: impl Into<String>, image: DynamicImage) {
        self.images.insert(filename.into(), image);
    }

    pub fn get(&self, filename: &str) -> Option<&DynamicImage> {
        self.images.get(filename)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

impl ImageStore for MemoryStore {
    fn load(&self, filename: &str) -> Result<DynamicImage> {
        self.images
            .get(filename)
            .cloned()
            .ok_or_else(|| BildwerkError::Workspace(format!("no image stored as '{filename}'")))
    }

    fn save(
        &mut self,
        id: &str,
        image: &DynamicImage,
        mime: ImageMime,
        _page_id: Option<&str>,
    ) -> Result<String> {
        let filename = format!("{id}{}", mime.extension());
        self.images.insert(filename.clone(), image.clone());
        Ok(filename)
    }
}
