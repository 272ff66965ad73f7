// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for Bildwerk.

use image::ImageFormat;
use serde::{Deserialize, Serialize};

use crate::error::BildwerkError;

/// Depth of the document hierarchy, from coarse to fine.
///
/// The derived `Ord` follows nesting: `Page < Region < Line < Word < Glyph`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Page,
    Region,
    Line,
    Word,
    Glyph,
}

impl Level {
    pub const ALL: [Level; 5] = [
        Level::Page,
        Level::Region,
        Level::Line,
        Level::Word,
        Level::Glyph,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Page => "page",
            Self::Region => "region",
            Self::Line => "line",
            Self::Word => "word",
            Self::Glyph => "glyph",
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Level {
    type Err = BildwerkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Level::ALL
            .into_iter()
            .find(|level| level.as_str() == s)
            .ok_or_else(|| {
                BildwerkError::Configuration(format!(
                    "unknown level-of-operation '{s}' (expected page, region, line, word or glyph)"
                ))
            })
    }
}

/// Raster formats that images can be exchanged in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ImageMime {
    #[default]
    Png,
    Tiff,
    Jpeg,
    Bmp,
    /// Portable anymap (PBM/PGM/PPM), handy for command-line tools.
    Pnm,
}

impl ImageMime {
    /// MIME type string as stored in the workspace manifest.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Tiff => "image/tiff",
            Self::Jpeg => "image/jpeg",
            Self::Bmp => "image/bmp",
            Self::Pnm => "image/x-portable-anymap",
        }
    }

    /// File extension including the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => ".png",
            Self::Tiff => ".tif",
            Self::Jpeg => ".jpg",
            Self::Bmp => ".bmp",
            Self::Pnm => ".pnm",
        }
    }

    pub fn image_format(&self) -> ImageFormat {
        match self {
            Self::Png => ImageFormat::Png,
            Self::Tiff => ImageFormat::Tiff,
            Self::Jpeg => ImageFormat::Jpeg,
            Self::Bmp => ImageFormat::Bmp,
            Self::Pnm => ImageFormat::Pnm,
        }
    }

    pub fn from_mime_type(mime: &str) -> Option<Self> {
        match mime.to_ascii_lowercase().as_str() {
            "image/png" => Some(Self::Png),
            "image/tiff" | "image/tif" => Some(Self::Tiff),
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/bmp" | "image/x-ms-bmp" => Some(Self::Bmp),
            "image/x-portable-anymap"
            | "image/x-portable-bitmap"
            | "image/x-portable-graymap"
            | "image/x-portable-pixmap" => Some(Self::Pnm),
            _ => None,
        }
    }
}


impl std::fmt::Display for ImageMime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mime_type())
    }
}

impl TryFrom<String> for ImageMime {
    type Error = BildwerkError;

    fn try_from(mime: String) -> Result<Self, Self::Error> {
        Self::from_mime_type(&mime).ok_or_else(|| {
            BildwerkError::Configuration(format!("unsupported image MIME type '{mime}'"))
        })
    }
}

impl From<ImageMime> for String {
    fn from(mime: ImageMime) -> Self {
        mime.mime_type().to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordered_by_depth() {
        assert!(Level::Page < Level::Region);
        assert!(Level::Word < Level::Glyph);
        assert_eq!(Level::ALL.iter().max(), Some(&Level::Glyph));
    }

    #[test]
    fn level_parses_lowercase_names() {
        assert_eq!("line".parse::<Level>().expect("parse"), Level::Line);
        assert!(matches!(
            "paragraph".parse::<Level>(),
            Err(BildwerkError::Configuration(_))
        ));
    }

    #[test]
    fn mime_lookup_accepts_aliases() {
        assert_eq!(ImageMime::from_mime_type("IMAGE/TIF"), Some(ImageMime::Tiff));
        assert_eq!(ImageMime::from_mime_type("image/webp"), None);
        assert_eq!(ImageMime::Tiff.extension(), ".tif");
    }

    #[test]
    fn mime_deserializes_from_string() {
        let mime: ImageMime = serde_json::from_str("\"image/jpeg\"").expect("deserialize");
        assert_eq!(mime, ImageMime::Jpeg);
        assert!(serde_json::from_str::<ImageMime>("\"text/plain\"").is_err());
    }

    #[test]
    fn mime_defaults_to_png() {
        assert_eq!(ImageMime::default(), ImageMime::Png);
        assert_eq!(ImageMime::default().to_string(), "image/png");
    }
}
