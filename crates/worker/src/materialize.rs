//! Upload the files referenced by `executed` events.
//!
//! ComfyUI reports generated images as references into its local
//! output, temp and input directories. [`Materializer::materialize`]
//! uploads those files and writes the resulting URL into each reference
//! before the event is handed on. Every other event is returned as is.

use std::path::{Component, Path, PathBuf};

use relay_cloud::{UploadError, Uploader};
use relay_comfyui::messages::EXECUTED;
use relay_comfyui::StreamEvent;
use relay_core::config::OutputDirs;
use serde::Deserialize;

/// Key added to each image reference.
pub const URL_FIELD: &str = "url";

/// Errors from materializing an event.
#[derive(Debug, thiserror::Error)]
pub enum MaterializeError {
    /// An `output.images` entry is not an object with a string `filename`.
    #[error("Invalid image reference at index {index}: {source}")]
    InvalidFileRef {
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    /// The reference would resolve outside its type directory.
    #[error("Image reference at index {index} escapes its directory: {path}")]
    UnsafePath { index: usize, path: String },

    /// Uploading the referenced files failed.
    #[error(transparent)]
    Upload(#[from] UploadError),
}

/// Typed view of one entry of `output.images`.
#[derive(Debug, Deserialize)]
pub struct FileRef {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    pub filename: String,
    #[serde(default)]
    pub subfolder: Option<String>,
}

impl FileRef {
    /// Local path of the referenced file.
    ///
    /// `output` and `temp` map to their directories; any other type
    /// (including none) resolves against the input directory. Returns
    /// `None` if `subfolder` or `filename` is absolute, climbs with `..`,
    /// or the filename is empty.
    pub fn local_path(&self, dirs: &OutputDirs) -> Option<PathBuf> {
        let base = match self.kind.as_deref() {
            Some("output") => &dirs.output,
            Some("temp") => &dirs.temp,
            _ => &dirs.input,
        };
        Path::new(&self.filename).file_name()?;

        let mut path = base.clone();
        let parts = self.subfolder.iter().chain(std::iter::once(&self.filename));
        for component in parts.flat_map(|part| Path::new(part).components()) {
            match component {
                Component::Normal(name) => path.push(name),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
            }
        }
        Some(path)
    }
}

/// Rewrites `executed` events with uploaded file URLs.
#[derive(Clone)]
pub struct Materializer {
    dirs: OutputDirs,
    uploader: Uploader,
}

impl Materializer {
    pub fn new(dirs: OutputDirs, uploader: Uploader) -> Self {
        Self { dirs, uploader }
    }

    /// Upload the event's images, if any, and annotate them with URLs.
    ///
    /// The images array keeps its order and length; each entry gains a
    /// `url` and keeps every other field.
    pub async fn materialize(
        &self,
        job_id: &str,
        mut event: StreamEvent,
    ) -> Result<StreamEvent, MaterializeError> {
        if event.kind != EXECUTED {
            return Ok(event);
        }

        let Some(images) = event
            .data
            .get_mut("output")
            .and_then(|output| output.get_mut("images"))
            .and_then(serde_json::Value::as_array_mut)
        else {
            return Ok(event);
        };

        if images.is_empty() {
            return Ok(event);
        }

        let paths = images
            .iter()
            .enumerate()
            .map(|(index, image)| self.resolve(index, image))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!(job_id, files = ?paths, "Uploading files");

        let urls = self.uploader.upload_all(job_id, paths).await?;

        for (image, url) in images.iter_mut().zip(urls) {
            if let Some(entry) = image.as_object_mut() {
                entry.insert(URL_FIELD.to_string(), serde_json::Value::String(url));
            }
        }

        Ok(event)
    }

    /// Local path for one `output.images` entry.
    ///
    /// Only objects are accepted, since the URL is written back as a key.
    fn resolve(&self, index: usize, image: &serde_json::Value) -> Result<PathBuf, MaterializeError> {
        let invalid = |source: serde_json::Error| MaterializeError::InvalidFileRef { index, source };
        if !image.is_object() {
            return Err(invalid(<serde_json::Error as serde::de::Error>::custom(
                "image reference must be a JSON object",
            )));
        }

        let file_ref = FileRef::deserialize(image).map_err(invalid)?;
        file_ref
            .local_path(&self.dirs)
            .ok_or_else(|| MaterializeError::UnsafePath {
                index,
                path: match file_ref.subfolder.as_deref().filter(|s| !s.is_empty()) {
                    Some(subfolder) => format!("{subfolder}/{}", file_ref.filename),
                    None => file_ref.filename.clone(),
                },
            })
    }
}
