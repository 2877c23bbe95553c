use std::fmt::Display;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use super::error::StreamError;

/// An owned markup element.
///
/// Names are stored without their namespace prefix, so `<stream:features>` is named `features`.
/// Attribute keys keep their prefix.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Element>,
    /// Concatenated text directly inside this element
    pub text: String,
}

impl Element {
    /// Parses the first root element of `markup`.
    pub fn parse(markup: &str) -> Result<Self, StreamError> {
        let mut reader = Reader::from_str(markup);
        reader.config_mut().trim_text(true);

        let mut open: Vec<Element> = Vec::new();

        loop {
            match reader.read_event().map_err(invalid)? {
                Event::Start(start) => open.push(Self::from_start(&start)?),
                Event::Empty(start) => {
                    let element = Self::from_start(&start)?;
                    match open.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None => return Ok(element),
                    }
                }
                Event::End(_) => {
                    let element = open
                        .pop()
                        .ok_or_else(|| StreamError::Markup("unbalanced closing tag".to_owned()))?;
                    match open.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None => return Ok(element),
                    }
                }
                Event::Text(text) => {
                    if let Some(current) = open.last_mut() {
                        current.text.push_str(&text.unescape().map_err(invalid)?);
                    }
                }
                Event::CData(data) => {
                    if let Some(current) = open.last_mut() {
                        current
                            .text
                            .push_str(&String::from_utf8_lossy(&data.into_inner()));
                    }
                }
                Event::Eof => {
                    return Err(StreamError::Markup(match open.first() {
                        Some(root) => format!("element `{}` is not closed", root.name),
                        None => "no element found".to_owned(),
                    }));
                }
                _ => {}
            }
        }
    }

    fn from_start(start: &BytesStart<'_>) -> Result<Self, StreamError> {
        let mut attributes = Vec::new();

        for attribute in start.attributes() {
            let attribute = attribute.map_err(invalid)?;
            let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
            let value = attribute.unescape_value().map_err(invalid)?.into_owned();
            attributes.push((key, value));
        }

        Ok(Self {
            name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
            attributes,
            ..Self::default()
        })
    }

    #[must_use]
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// First direct child named `name`.
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|child| child.name == name)
    }

    /// First descendant named `name`, in document order.
    #[must_use]
    pub fn descendant(&self, name: &str) -> Option<&Element> {
        self.children.iter().find_map(|child| {
            if child.name == name {
                Some(child)
            } else {
                child.descendant(name)
            }
        })
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }
}

fn invalid<E: Display>(e: E) -> StreamError {
    StreamError::Markup(e.to_string())
}
