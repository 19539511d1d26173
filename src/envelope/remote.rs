use std::path::PathBuf;

use crate::envelope::EnvelopeError;
use crate::envelope::element::{Element, Node};

/// Elements whose `href` attribute is resolved before a command runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefTarget {
    /// Replaced by the fetched `<Document>`.
    Document,
    /// Gains a `<Contents>` child with the fetched text.
    OriginalText,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteRef {
    Http {
        url: String,
        host: String,
        port: u16,
        /// Path plus query, as sent on the request line
        path: String,
    },
    File {
        url: String,
        path: PathBuf,
    },
}

impl RemoteRef {
    pub fn url(&self) -> &str {
        match self {
            RemoteRef::Http { url, .. } | RemoteRef::File { url, .. } => url,
        }
    }
}

/// One `href` found in an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Child indexes from the envelope root to the referencing element
    pub path: Vec<usize>,
    pub target: RefTarget,
    pub remote: RemoteRef,
}

/// Parses an `href` value.
///
/// ```
/// # use docserve::envelope::remote::{parse_reference, RemoteRef};
/// let r = parse_reference("http://docs.local:8080/a/b.xml?v=2").unwrap();
/// assert!(matches!(r, RemoteRef::Http { port: 8080, .. }));
/// assert!(parse_reference("file:///srv/doc.xml").is_ok());
/// assert!(parse_reference("ftp://host/doc").is_err());
/// ```
pub fn parse_reference(href: &str) -> Result<RemoteRef, EnvelopeError> {
    let lower = href.to_ascii_lowercase();

    if lower.starts_with("http://") {
        let url = url::Url::parse(href).map_err(|_| EnvelopeError::UnsupportedHref(href.to_string()))?;
        let host = url
            .host_str()
            .ok_or_else(|| EnvelopeError::UnsupportedHref(href.to_string()))?
            .to_string();
        let port = url.port_or_known_default().unwrap_or(80);
        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }
        return Ok(RemoteRef::Http {
            url: href.to_string(),
            host,
            port,
            path,
        });
    }

    if lower.starts_with("file://") {
        let path = &href["file://".len()..];
        if !path.starts_with('/') {
            return Err(EnvelopeError::Invalid(format!(
                "file:// URL must name an absolute path: {}",
                href
            )));
        }
        return Ok(RemoteRef::File {
            url: href.to_string(),
            path: PathBuf::from(path),
        });
    }

    Err(EnvelopeError::UnsupportedHref(href.to_string()))
}

/// Finds every resolvable `href` under `root`, in document order.
pub fn collect_references(root: &Element) -> Result<Vec<Reference>, EnvelopeError> {
    let mut refs = Vec::new();
    let mut path = Vec::new();
    walk(root, &mut path, &mut refs)?;
    Ok(refs)
}

fn walk(element: &Element, path: &mut Vec<usize>, refs: &mut Vec<Reference>) -> Result<(), EnvelopeError> {
    let target = if element.is("Document") {
        Some(RefTarget::Document)
    } else if element.is("OriginalText") {
        Some(RefTarget::OriginalText)
    } else {
        None
    };

    if let (Some(target), Some(href)) = (target, element.attr("href")) {
        if target == RefTarget::Document && element.child_elements().next().is_some() {
            return Err(EnvelopeError::Invalid(
                "A Document with an href attribute must not have child elements".to_string(),
            ));
        }
        refs.push(Reference {
            path: path.clone(),
            target,
            remote: parse_reference(href)?,
        });
        if target == RefTarget::Document {
            return Ok(());
        }
    }

    for (i, child) in element.children.iter().enumerate() {
        if let Node::Element(child) = child {
            path.push(i);
            walk(child, path, refs)?;
            path.pop();
        }
    }
    Ok(())
}

/// Splices fetched content into the referencing element.
pub fn substitute(root: &mut Element, reference: &Reference, fetched: &[u8]) -> Result<(), EnvelopeError> {
    let url = reference.remote.url();
    let target = root
        .element_at_mut(&reference.path)
        .ok_or_else(|| EnvelopeError::Invalid(format!("No element refers to {}", url)))?;
    let text = String::from_utf8_lossy(fetched);

    match reference.target {
        RefTarget::Document => {
            let fetched_root = Element::parse(&text)?;
            let mut document = if fetched_root.is("Document") {
                fetched_root
            } else {
                let mut children = fetched_root.child_elements();
                match (children.next(), children.next()) {
                    (Some(only), None) if only.is("Document") => only.clone(),
                    _ => {
                        return Err(EnvelopeError::Invalid(format!(
                            "{} does not contain a Document element",
                            url
                        )));
                    }
                }
            };
            for (k, v) in &target.attributes {
                if !k.eq_ignore_ascii_case("href") {
                    document.set_attr(k.clone(), v.clone());
                }
            }
            *target = document;
        }
        RefTarget::OriginalText => {
            let contents: Vec<String> = target
                .child_elements()
                .filter(|e| e.is("Contents"))
                .map(Element::text)
                .collect();
            match contents.as_slice() {
                [] => target
                    .children
                    .push(Node::Element(Element::new("Contents").with_text(text.into_owned()))),
                [existing] => {
                    if existing.as_str() != text.as_ref() {
                        return Err(EnvelopeError::Invalid(format!(
                            "OriginalText Contents do not match the content of {}",
                            url
                        )));
                    }
                }
                _ => {
                    return Err(EnvelopeError::Invalid(
                        "OriginalText has more than one Contents element".to_string(),
                    ));
                }
            }
            target.remove_attr("href");
        }
    }
    Ok(())
}
