//! Pass-through engines.
//!
//! `EchoEngine` runs a fixed list of named stages that do nothing but
//! record themselves on the document. It keeps the server usable without
//! a real engine and is what the tests run against.

use std::path::{Path, PathBuf};

use crate::engine::{
    ConvertRequest, DocumentEngine, EngineError, EngineLoader, EngineSettings, OutputFormat,
    PatternEngine, PatternMatchRequest, ProcessDocumentRequest, SourceKind,
};
use crate::envelope::element::{Element, escape};

pub const STAGES: &[&str] = &["START", "tokens", "parse", "mentions", "output"];

pub struct EchoEngine {
    language: String,
    documents: usize,
}

impl EchoEngine {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            documents: 0,
        }
    }
}

impl DocumentEngine for EchoEngine {
    fn language(&self) -> &str {
        &self.language
    }

    fn stage_position(&self, stage: &str) -> Option<usize> {
        STAGES.iter().position(|s| s.eq_ignore_ascii_case(stage))
    }

    fn process(&mut self, request: &ProcessDocumentRequest) -> Result<String, EngineError> {
        let mut document = Element::parse(&request.document)
            .map_err(|e| EngineError::Input(format!("Document is not well formed: {}", e)))?;

        let start = request
            .start_stage
            .as_deref()
            .and_then(|s| self.stage_position(s))
            .unwrap_or(0);
        let end = request
            .end_stage
            .as_deref()
            .and_then(|s| self.stage_position(s))
            .unwrap_or(STAGES.len() - 1);
        if start > end {
            return Err(EngineError::Input("Start stage comes after end stage".to_string()));
        }

        self.documents += 1;
        let stages = STAGES[start..=end].join(" ");
        document.set_attr("stages", stages);
        document.set_attr("language", self.language.clone());

        let response = Element::new("ProcessDocumentResponse")
            .with_attr("session_id", request.session_id.clone())
            .with_attr("document_number", self.documents.to_string())
            .with_child(document);
        Ok(response.to_xml())
    }

    fn convert(&mut self, request: &ConvertRequest) -> Result<String, EngineError> {
        let source = match request.source {
            SourceKind::Sgm => "sgm",
            SourceKind::RawText => "rawtext",
        };
        self.documents += 1;
        Ok(match request.format {
            OutputFormat::Apf => format!(
                "<source_file SOURCE=\"{}\" TYPE=\"text\"><document DOCID=\"{}-{}\">{}</document></source_file>",
                source,
                escape(&request.session_id),
                self.documents,
                escape(&request.content)
            ),
            OutputFormat::Xml => Element::new("Document")
                .with_attr("source", source)
                .with_attr("language", self.language.clone())
                .with_child(Element::new("OriginalText").with_child(Element::new("Contents").with_text(request.content.clone())))
                .to_xml(),
        })
    }
}

/// Pattern sets listed one per line as `name path`; `#` starts a comment.
pub struct EchoPatternEngine {
    sets: Vec<(String, PathBuf)>,
}

impl EchoPatternEngine {
    pub fn parse(list: &str) -> Result<Self, EngineError> {
        let mut sets = Vec::new();
        for (n, line) in list.lines().enumerate() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let (name, path) = line
                .split_once(char::is_whitespace)
                .ok_or_else(|| EngineError::Load(format!("pattern set list line {}: expected `name path`", n + 1)))?;
            sets.push((name.to_string(), PathBuf::from(path.trim())));
        }
        Ok(Self { sets })
    }
}

impl PatternEngine for EchoPatternEngine {
    fn pattern_set_names(&self) -> Vec<String> {
        self.sets.iter().map(|(name, _)| name.clone()).collect()
    }

    fn match_document(&self, request: &PatternMatchRequest) -> Result<String, EngineError> {
        let selected: Vec<&str> = match &request.pattern_set {
            Some(name) => {
                let set = self
                    .sets
                    .iter()
                    .find(|(n, _)| n == name)
                    .ok_or_else(|| EngineError::Input(format!("Unknown pattern set: {}", name)))?;
                vec![set.0.as_str()]
            }
            None => self.sets.iter().map(|(n, _)| n.as_str()).collect(),
        };

        let mut response = Element::new("PatternMatchResponse")
            .with_attr("session_id", request.session_id.clone())
            .with_attr("slots", request.slots.len().to_string());
        for name in selected {
            let predicates: usize = request.slot_weights.iter().map(|w| w.predicates.len()).sum();
            response = response.with_child(
                Element::new("PatternSet")
                    .with_attr("name", name)
                    .with_attr("weighted_predicates", predicates.to_string())
                    .with_attr("equivalent_names", request.equivalent_names.len().to_string()),
            );
        }
        Ok(response.to_xml())
    }
}

#[derive(Debug, Default)]
pub struct EchoLoader;

impl EngineLoader for EchoLoader {
    fn load_engine(&mut self, settings: &EngineSettings) -> Result<Box<dyn DocumentEngine>, EngineError> {
        let language = if settings.language.is_empty() {
            "English"
        } else {
            settings.language.as_str()
        };
        Ok(Box::new(EchoEngine::new(language)))
    }

    fn load_pattern_sets(&mut self, path: &Path) -> Result<Box<dyn PatternEngine>, EngineError> {
        let list = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Load(format!("cannot read pattern set list {}: {}", path.display(), e)))?;
        Ok(Box::new(EchoPatternEngine::parse(&list)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_stage_range() {
        let mut engine = EchoEngine::new("English");
        let request = ProcessDocumentRequest {
            session_id: "s1".into(),
            start_stage: Some("tokens".into()),
            end_stage: Some("parse".into()),
            document: "<Document docid=\"d\"/>".into(),
            ..Default::default()
        };
        let out = engine.process(&request).unwrap();
        let root = Element::parse(&out).unwrap();
        assert_eq!(root.child("Document").unwrap().attr("stages"), Some("tokens parse"));
    }

    #[test]
    fn pattern_set_list_skips_comments() {
        let engine = EchoPatternEngine::parse("# sets\npeople /tmp/p.txt\n\nplaces /tmp/q.txt # trailing\n").unwrap();
        assert_eq!(engine.pattern_set_names(), vec!["people", "places"]);
    }

    #[test]
    fn unknown_pattern_set_is_input_error() {
        let engine = EchoPatternEngine::parse("people /tmp/p.txt").unwrap();
        let request = PatternMatchRequest {
            pattern_set: Some("nobody".into()),
            ..Default::default()
        };
        assert!(matches!(engine.match_document(&request), Err(EngineError::Input(_))));
    }
}
