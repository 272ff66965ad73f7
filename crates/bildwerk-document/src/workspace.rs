// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// On-disk workspace.
//
// A workspace is a directory of file groups (one subdirectory each) plus a
// JSON manifest that registers every file Bildwerk wrote: its identifier,
// file group, page, MIME type and relative path. Page documents live in their
// group as `{id}.json`; derived rasters as `{id}{ext}`.

use std::path::{Path, PathBuf};

use bildwerk_core::error::{BildwerkError, Result};
use bildwerk_core::ImageMime;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::image::processor::ImageProcessor;
use crate::model::PageDocument;
use crate::store::ImageStore;

/// MIME type recorded for serialized page documents.
pub const PAGE_MIMETYPE: &str = "application/vnd.bildwerk.page+json";

/// One registered file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub id: String,
    pub file_grp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_id: Option<String>,
    pub mimetype: String,
    pub local_filename: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub files: Vec<FileEntry>,
}

impl Manifest {
    /// Register a file, replacing any earlier entry with the same identifier.
    pub fn add(&mut self, entry: FileEntry) {
        self.files.retain(|f| f.id != entry.id);
        self.files.push(entry);
    }

    pub fn find(&self, id: &str) -> Option<&FileEntry> {
        self.files.iter().find(|f| f.id == id)
    }
}

/// A workspace directory with one active output file group.
pub struct Workspace {
    root: PathBuf,
    output_file_grp: String,
    manifest: Manifest,
}

impl Workspace {
    /// Name of the manifest file in the workspace root.
    pub const MANIFEST_NAME: &'static str = "bildwerk.json";

    /// Open (or start) a workspace at `root`, writing into `output_file_grp`.
    #[instrument(skip_all, fields(root = %root.as_ref().display(), output_file_grp = %output_file_grp))]
    pub fn open(root: impl AsRef<Path>, output_file_grp: &str) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(BildwerkError::Workspace(format!(
                "workspace directory {} does not exist",
                root.display()
            )));
        }
        let manifest_path = root.join(Self::MANIFEST_NAME);
        let manifest = if manifest_path.exists() {
            let text = std::fs::read_to_string(&manifest_path)?;
            serde_json::from_str(&text)?
        } else {
            Manifest::default()
        };
        debug!(files = manifest.files.len(), "workspace opened");
        Ok(Self {
            root,
            output_file_grp: output_file_grp.to_owned(),
            manifest,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn output_file_grp(&self) -> &str {
        &self.output_file_grp
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Page documents of a file group, sorted by file name.
    pub fn documents_in(&self, file_grp: &str) -> Result<Vec<PathBuf>> {
        let dir = self.root.join(file_grp);
        if !dir.is_dir() {
            return Err(BildwerkError::Workspace(format!(
                "input file group {} not found in {}",
                file_grp,
                self.root.display()
            )));
        }
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    pub fn load_document(&self, path: &Path) -> Result<PageDocument> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Write a page document into the output file group and register it.
    #[instrument(skip(self, document))]
    pub fn save_document(
        &mut self,
        file_id: &str,
        document: &PageDocument,
        page_id: Option<&str>,
    ) -> Result<PathBuf> {
        let local_filename = format!("{}/{}.json", self.output_file_grp, file_id);
        let path = self.prepare_output(&local_filename)?;
        std::fs::write(&path, serde_json::to_string_pretty(document)?)?;
        self.manifest.add(FileEntry {
            id: file_id.to_owned(),
            file_grp: self.output_file_grp.clone(),
            page_id: page_id.map(str::to_owned),
            mimetype: PAGE_MIMETYPE.to_owned(),
            local_filename,
        });
        info!(path = %path.display(), "page document written");
        Ok(path)
    }

    /// Persist the manifest next to the file groups.
    pub fn save_manifest(&self) -> Result<()> {
        let path = self.root.join(Self::MANIFEST_NAME);
        std::fs::write(&path, serde_json::to_string_pretty(&self.manifest)?)?;
        debug!(files = self.manifest.files.len(), "manifest written");
        Ok(())
    }

    fn resolve(&self, filename: &str) -> PathBuf {
        let path = Path::new(filename);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    fn prepare_output(&self, local_filename: &str) -> Result<PathBuf> {
        let path = self.root.join(local_filename);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(path)
    }
}

impl ImageStore for Workspace {
    fn load(&self, filename: &str) -> Result<DynamicImage> {
        Ok(ImageProcessor::open(self.resolve(filename))?.into_dynamic())
    }

    fn save(
        &mut self,
        id: &str,
        image: &DynamicImage,
        mime: ImageMime,
        page_id: Option<&str>,
    ) -> Result<String> {
        let local_filename = format!("{}/{}{}", self.output_file_grp, id, mime.extension());
        let path = self.prepare_output(&local_filename)?;
        ImageProcessor::from_dynamic(image.clone()).save(&path, mime)?;
        self.manifest.add(FileEntry {
            id: id.to_owned(),
            file_grp: self.output_file_grp.clone(),
            page_id: page_id.map(str::to_owned),
            mimetype: mime.mime_type().to_owned(),
            local_filename: local_filename.clone(),
        });
        info!(
            file_id = id,
            file_grp = %self.output_file_grp,
            path = %path.display(),
            "created image file"
        );
        Ok(local_filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Page;
    use image::{GrayImage, Luma};

    fn sample_document() -> PageDocument {
        PageDocument {
            pc_gts_id: "IN_0001".into(),
            page: Page {
                id: "PHYS_0001".into(),
                image_filename: "IN/0001.png".into(),
                image_width: 8,
                image_height: 8,
                image_resolution: None,
                border: None,
                orientation: None,
                alternative_images: Vec::new(),
                regions: Vec::new(),
                metadata: Vec::new(),
            },
        }
    }

    #[test]
    fn missing_root_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = Workspace::open(dir.path().join("nope"), "OUT");
        assert!(matches!(result, Err(BildwerkError::Workspace(_))));
    }

    #[test]
    fn saved_images_are_registered_and_loadable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut ws = Workspace::open(dir.path(), "OUT").expect("open");
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(9, 4, Luma([128u8])));

        let name = ws
            .save("OUT_0001.IMG-BIN_r1", &img, ImageMime::Png, Some("PHYS_0001"))
            .expect("save");
        assert_eq!(name, "OUT/OUT_0001.IMG-BIN_r1.png");

        let entry = ws.manifest().find("OUT_0001.IMG-BIN_r1").expect("registered");
        assert_eq!(entry.mimetype, "image/png");
        assert_eq!(entry.page_id.as_deref(), Some("PHYS_0001"));

        let back = ws.load(&name).expect("load");
        assert_eq!((back.width(), back.height()), (9, 4));
    }

    #[test]
    fn documents_and_manifest_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut ws = Workspace::open(dir.path(), "OUT").expect("open");
        let path = ws
            .save_document("OUT_0001", &sample_document(), Some("PHYS_0001"))
            .expect("save document");
        ws.save_manifest().expect("save manifest");

        let reopened = Workspace::open(dir.path(), "OTHER").expect("reopen");
        assert!(reopened.manifest().find("OUT_0001").is_some());
        assert_eq!(reopened.documents_in("OUT").expect("list"), vec![path.clone()]);
        let doc = reopened.load_document(&path).expect("load document");
        assert_eq!(doc, sample_document());
    }

    #[test]
    fn re_adding_an_id_replaces_the_entry() {
        let mut manifest = Manifest::default();
        let entry = |name: &str| FileEntry {
            id: "X".into(),
            file_grp: "OUT".into(),
            page_id: None,
            mimetype: "image/png".into(),
            local_filename: name.into(),
        };
        manifest.add(entry("OUT/a.png"));
        manifest.add(entry("OUT/b.png"));
        assert_eq!(manifest.files.len(), 1);
        assert_eq!(manifest.files[0].local_filename, "OUT/b.png");
    }
}
