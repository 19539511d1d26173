use crate::engine::{EquivalentNames, PatternMatchRequest, ProcessDocumentRequest, SlotWeights};
use crate::envelope::EnvelopeError;
use crate::envelope::element::Element;
use crate::envelope::remote::{self, Reference};

const MAX_SLOTS: usize = 3;

/// One command from an envelope, ready to become a task.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ProcessDocument(ProcessDocumentRequest),
    PatternMatch(PatternMatchRequest),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::ProcessDocument(_) => "ProcessDocument",
            Command::PatternMatch(_) => "PatternMatch",
        }
    }
}

/// Session ids are restricted to `[-A-Za-z0-9_]+`.
pub fn valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[derive(Debug)]
pub struct Envelope {
    root: Element,
    session_id: Option<String>,
}

impl Envelope {
    pub fn parse(content: &str) -> Result<Self, EnvelopeError> {
        let root = Element::parse(content)?;
        if !root.is("Request") {
            return Err(EnvelopeError::Invalid(format!(
                "Expected <Request> as the root element, found <{}>",
                root.name
            )));
        }

        let session_id = root.attr("session_id").map(str::to_string);
        if let Some(id) = &session_id {
            if !valid_session_id(id) {
                return Err(EnvelopeError::Invalid(format!("Bad session id: {}", id)));
            }
        }

        if root.child_elements().next().is_none() {
            return Err(EnvelopeError::Invalid("Request contains no commands".to_string()));
        }

        Ok(Self { root, session_id })
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    pub fn references(&self) -> Result<Vec<Reference>, EnvelopeError> {
        remote::collect_references(&self.root)
    }

    pub fn substitute(&mut self, reference: &Reference, fetched: &[u8]) -> Result<(), EnvelopeError> {
        remote::substitute(&mut self.root, reference, fetched)
    }

    /// Converts every command element, in order.
    pub fn into_commands(self, session_id: &str) -> Result<Vec<Command>, EnvelopeError> {
        self.root
            .child_elements()
            .map(|element| {
                if element.is("ProcessDocument") {
                    process_document(element, session_id).map(Command::ProcessDocument)
                } else if element.is("PatternMatch") {
                    pattern_match(element, session_id).map(Command::PatternMatch)
                } else {
                    Err(EnvelopeError::UnknownCommand(element.name.clone()))
                }
            })
            .collect()
    }
}

fn process_document(element: &Element, session_id: &str) -> Result<ProcessDocumentRequest, EnvelopeError> {
    let mut children = element.child_elements();
    let document = match (children.next(), children.next()) {
        (Some(doc), None) if doc.is("Document") => doc,
        (Some(wrapper), None) if wrapper.is("DocumentXML") => {
            let mut inner = wrapper.child_elements();
            match (inner.next(), inner.next()) {
                (Some(doc), None) if doc.is("Document") => doc,
                _ => return Err(single_document_error()),
            }
        }
        _ => return Err(single_document_error()),
    };

    let attr = |key: &str| element.attr(key).map(str::to_string);
    Ok(ProcessDocumentRequest {
        session_id: session_id.to_string(),
        language: attr("language"),
        start_stage: attr("start_stage"),
        end_stage: attr("end_stage"),
        output_format: attr("output_format"),
        options: element.attributes.clone(),
        document: document.to_xml(),
    })
}

fn single_document_error() -> EnvelopeError {
    EnvelopeError::Invalid("ProcessDocument requires exactly one Document element".to_string())
}

fn pattern_match(element: &Element, session_id: &str) -> Result<PatternMatchRequest, EnvelopeError> {
    let mut children = element.child_elements();
    let document = children
        .next()
        .ok_or_else(|| EnvelopeError::Invalid("PatternMatch requires a document".to_string()))?;

    let mut request = PatternMatchRequest {
        session_id: session_id.to_string(),
        pattern_set: element.attr("pattern_set_name").map(str::to_string),
        options: element.attributes.clone(),
        document: document.to_xml(),
        ..Default::default()
    };

    for child in children {
        if child.is("slot_weights") {
            request.slot_weights.push(slot_weights(child)?);
        } else if child.is("EquivalentNames") {
            request.equivalent_names.extend(equivalent_names(child)?);
        } else {
            if request.slots.len() == MAX_SLOTS {
                return Err(EnvelopeError::Invalid(
                    "PatternMatch has too many child elements".to_string(),
                ));
            }
            request.slots.push(child.to_xml());
        }
    }
    Ok(request)
}

fn slot_weights(element: &Element) -> Result<SlotWeights, EnvelopeError> {
    let query_slot = element
        .attr("query_slot")
        .ok_or_else(|| EnvelopeError::Invalid("slot_weights requires a query_slot attribute".to_string()))?;

    let predicates = element
        .child_elements()
        .filter(|e| e.is("predicate"))
        .map(|p| -> Result<(String, f64), EnvelopeError> {
            Ok((p.text().trim().to_string(), number(p, "weight")?))
        })
        .collect::<Result<Vec<_>, EnvelopeError>>()?;

    Ok(SlotWeights {
        query_slot: query_slot.to_string(),
        predicates,
    })
}

fn equivalent_names(element: &Element) -> Result<Vec<EquivalentNames>, EnvelopeError> {
    element
        .child_elements()
        .filter(|e| e.is("Name"))
        .map(|name| -> Result<EquivalentNames, EnvelopeError> {
            let equivalents = name
                .child_elements()
                .filter(|e| e.is("EquivalentName"))
                .map(|eq| -> Result<(String, f64), EnvelopeError> {
                    Ok((required(eq, "text")?.to_string(), number(eq, "score")?))
                })
                .collect::<Result<Vec<_>, EnvelopeError>>()?;
            Ok(EquivalentNames {
                name: required(name, "text")?.to_string(),
                equivalents,
            })
        })
        .collect()
}

fn required<'a>(element: &'a Element, key: &str) -> Result<&'a str, EnvelopeError> {
    element
        .attr(key)
        .ok_or_else(|| EnvelopeError::Invalid(format!("<{}> requires a {} attribute", element.name, key)))
}

fn number(element: &Element, key: &str) -> Result<f64, EnvelopeError> {
    let raw = required(element, key)?;
    raw.trim()
        .parse()
        .map_err(|_| EnvelopeError::Invalid(format!("Bad {} on <{}>: {}", key, element.name, raw)))
}
