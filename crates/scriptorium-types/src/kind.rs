//! Node types and content categories.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::path::AbsPath;

/// File or directory.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NodeType {
    File,
    Directory,
}

impl NodeType {
    pub fn is_file(&self) -> bool {
        matches!(self, NodeType::File)
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, NodeType::Directory)
    }
}

/// Content category, derived from the file extension.
///
/// Ordering of the variants is the sibling sort order for files:
/// images, then markdown, then other text, then everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum FileCategory {
    Image,
    Markdown,
    Text,
    Other,
}

const IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "svg", "bmp", "ico", "avif", "tif", "tiff",
];

const MARKDOWN_EXTENSIONS: &[&str] = &["md", "markdown", "mdx", "mdown"];

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "json", "css", "js", "mjs", "ts", "tsx", "jsx", "html", "htm", "xml", "yml", "yaml",
    "toml", "csv", "ini", "rs", "py", "sh", "log", "mustache", "hbs", "ejs", "njk", "liquid",
];

impl FileCategory {
    /// Categorize by extension; no extension is `Other`.
    pub fn from_path(path: &AbsPath) -> Self {
        match path.extension() {
            Some(ext) => Self::from_extension(&ext),
            None => FileCategory::Other,
        }
    }

    pub fn from_extension(ext: &str) -> Self {
        let ext = ext.to_ascii_lowercase();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            FileCategory::Image
        } else if MARKDOWN_EXTENSIONS.contains(&ext.as_str()) {
            FileCategory::Markdown
        } else if TEXT_EXTENSIONS.contains(&ext.as_str()) {
            FileCategory::Text
        } else {
            FileCategory::Other
        }
    }

    /// Files whose content may reference other paths (find/replace targets).
    pub fn is_markdown_like(&self) -> bool {
        matches!(self, FileCategory::Markdown | FileCategory::Text)
    }
}
