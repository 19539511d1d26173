//! Engine boundary.
//!
//! The document engine and the pattern engine are not thread-safe. They are
//! created by an [`EngineLoader`] on the work queue's worker thread and are
//! never touched from anywhere else.

pub mod echo;

use std::path::{Path, PathBuf};

use thiserror::Error;

pub use echo::{EchoEngine, EchoLoader, EchoPatternEngine};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// The request itself is wrong (unknown stage, language mismatch, ...).
    #[error("{0}")]
    Input(String),

    /// The engine failed while processing a valid request.
    #[error("{0}")]
    Internal(String),

    /// Loading an engine or pattern set failed.
    #[error("{0}")]
    Load(String),
}

impl EngineError {
    /// HTTP status reported to the client.
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::Input(_) => 400,
            EngineError::Internal(_) | EngineError::Load(_) => 500,
        }
    }
}

/// Static settings handed to the loaders.
#[derive(Debug, Clone, Default)]
pub struct EngineSettings {
    pub language: String,
    pub log_dir: Option<PathBuf>,
    pub pattern_sets: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Apf,
    Xml,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Apf => "APF",
            OutputFormat::Xml => "XML",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// SGML-marked-up document
    Sgm,
    RawText,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessDocumentRequest {
    pub session_id: String,
    pub language: Option<String>,
    pub start_stage: Option<String>,
    pub end_stage: Option<String>,
    pub output_format: Option<String>,
    /// Every attribute of the command element
    pub options: Vec<(String, String)>,
    /// The `<Document>` element as XML
    pub document: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlotWeights {
    pub query_slot: String,
    pub predicates: Vec<(String, f64)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EquivalentNames {
    pub name: String,
    pub equivalents: Vec<(String, f64)>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatternMatchRequest {
    pub session_id: String,
    pub pattern_set: Option<String>,
    pub options: Vec<(String, String)>,
    pub document: String,
    /// At most three auxiliary documents
    pub slots: Vec<String>,
    pub slot_weights: Vec<SlotWeights>,
    pub equivalent_names: Vec<EquivalentNames>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConvertRequest {
    pub session_id: String,
    pub source: SourceKind,
    pub format: OutputFormat,
    pub content: String,
}

/// The main, stateful document engine.
pub trait DocumentEngine {
    fn language(&self) -> &str;

    /// Position of a named stage in the pipeline, if it exists.
    fn stage_position(&self, stage: &str) -> Option<usize>;

    fn process(&mut self, request: &ProcessDocumentRequest) -> Result<String, EngineError>;

    fn convert(&mut self, request: &ConvertRequest) -> Result<String, EngineError>;
}

/// Read-only pattern matcher.
pub trait PatternEngine {
    fn pattern_set_names(&self) -> Vec<String>;

    fn match_document(&self, request: &PatternMatchRequest) -> Result<String, EngineError>;
}

/// Builds the engines. Runs on the worker thread, after initialization.
pub trait EngineLoader: Send {
    fn load_engine(&mut self, settings: &EngineSettings) -> Result<Box<dyn DocumentEngine>, EngineError>;

    fn load_pattern_sets(&mut self, path: &Path) -> Result<Box<dyn PatternEngine>, EngineError>;
}
