//! Persisted studio and project documents
//!
//! The codec is a seam: the daemon ships with [`JsonCodec`], and anything
//! that can round-trip the document types can replace it.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::graph::GraphSnapshot;
use crate::server::ServerParams;
use crate::supervisor::AppSnapshot;

pub const DOCUMENT_VERSION: u32 = 1;

/// File name stem of a project document inside its directory
pub const PROJECT_FILE_STEM: &str = "studiod-project";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRef {
    pub name: String,
    pub dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub uuid: Uuid,
    pub name: String,
    pub template: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<ProjectRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudioDocument {
    pub version: u32,
    pub name: String,
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub server_params: ServerParams,
    #[serde(default)]
    pub server_graph: GraphSnapshot,
    #[serde(default)]
    pub studio_graph: GraphSnapshot,
    #[serde(default)]
    pub rooms: Vec<RoomSnapshot>,
    #[serde(default)]
    pub apps: Vec<AppSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectDocument {
    pub version: u32,
    pub name: String,
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub graph: GraphSnapshot,
    #[serde(default)]
    pub apps: Vec<AppSnapshot>,
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed document {path}: {message}")]
    Format { path: PathBuf, message: String },

    #[error("Unsupported document version {found} in {path}")]
    Version { path: PathBuf, found: u32 },
}

pub trait StudioCodec {
    /// File extension of studio files, without the dot.
    fn extension(&self) -> &'static str;

    fn write_studio(&self, path: &Path, doc: &StudioDocument) -> Result<(), CodecError>;

    fn read_studio(&self, path: &Path) -> Result<StudioDocument, CodecError>;

    fn write_project(&self, dir: &Path, doc: &ProjectDocument) -> Result<(), CodecError>;

    fn read_project(&self, dir: &Path) -> Result<ProjectDocument, CodecError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    fn project_file(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.{}", PROJECT_FILE_STEM, self.extension()))
    }

    fn write<T: Serialize>(path: &Path, value: &T) -> Result<(), CodecError> {
        let io_err = |source| CodecError::Io {
            path: path.to_path_buf(),
            source,
        };

        let file = File::create(path).map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, value).map_err(|e| CodecError::Format {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        writer.write_all(b"\n").map_err(io_err)?;
        writer.flush().map_err(io_err)
    }

    fn read<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, CodecError> {
        let file = File::open(path).map_err(|source| CodecError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|e| CodecError::Format {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    fn check_version(path: &Path, found: u32) -> Result<(), CodecError> {
        if found > DOCUMENT_VERSION {
            return Err(CodecError::Version {
                path: path.to_path_buf(),
                found,
            });
        }
        Ok(())
    }
}

impl StudioCodec for JsonCodec {
    fn extension(&self) -> &'static str {
        "json"
    }

    fn write_studio(&self, path: &Path, doc: &StudioDocument) -> Result<(), CodecError> {
        Self::write(path, doc)
    }

    fn read_studio(&self, path: &Path) -> Result<StudioDocument, CodecError> {
        let doc: StudioDocument = Self::read(path)?;
        Self::check_version(path, doc.version)?;
        Ok(doc)
    }

    fn write_project(&self, dir: &Path, doc: &ProjectDocument) -> Result<(), CodecError> {
        std::fs::create_dir_all(dir).map_err(|source| CodecError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        Self::write(&self.project_file(dir), doc)
    }

    fn read_project(&self, dir: &Path) -> Result<ProjectDocument, CodecError> {
        let path = self.project_file(dir);
        let doc: ProjectDocument = Self::read(&path)?;
        Self::check_version(&path, doc.version)?;
        Ok(doc)
    }
}
