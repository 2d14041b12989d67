//! Turning rendered markup into a replacement content node

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use sva_traits::{Attribute, ContentNode};

use crate::error::{IconError, IconResult};

/// Parse `markup` into a single detached element.
///
/// The markup must be non-empty and hold exactly one balanced root element.
/// Declarations, comments and whitespace around the root are allowed. The
/// root's children are kept verbatim as `inner_markup`.
pub fn parse_content(identifier: &str, markup: &str) -> IconResult<ContentNode> {
    let invalid = |reason: String| IconError::InvalidContent {
        identifier: identifier.to_string(),
        reason,
    };

    if markup.trim().is_empty() {
        return Err(invalid("renderer returned empty content".to_string()));
    }

    let mut reader = Reader::from_str(markup);
    let mut root: Option<(String, Vec<Attribute>)> = None;
    let mut inner = (0usize, 0usize);
    let mut depth = 0usize;
    let mut closed = false;

    loop {
        let before = reader.buffer_position() as usize;
        let event = reader
            .read_event()
            .map_err(|e| invalid(format!("malformed markup at byte {before}: {e}")))?;
        match event {
            Event::Start(start) => {
                if depth == 0 {
                    if closed {
                        return Err(invalid("more than one root element".to_string()));
                    }
                    root = Some(read_element(&start).map_err(invalid)?);
                    inner.0 = reader.buffer_position() as usize;
                }
                depth += 1;
            }
            Event::End(_) => {
                let Some(remaining) = depth.checked_sub(1) else {
                    return Err(invalid("unmatched closing tag".to_string()));
                };
                depth = remaining;
                if depth == 0 {
                    inner.1 = before;
                    closed = true;
                }
            }
            Event::Empty(start) if depth == 0 => {
                if closed {
                    return Err(invalid("more than one root element".to_string()));
                }
                root = Some(read_element(&start).map_err(invalid)?);
                let end = reader.buffer_position() as usize;
                inner = (end, end);
                closed = true;
            }
            Event::Text(text) if depth == 0 => {
                if !text.iter().all(u8::is_ascii_whitespace) {
                    return Err(invalid("text outside the root element".to_string()));
                }
            }
            Event::CData(_) if depth == 0 => {
                return Err(invalid("character data outside the root element".to_string()));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if depth > 0 {
        return Err(invalid("unclosed root element".to_string()));
    }
    let Some((tag, attrs)) = root else {
        return Err(invalid("no root element".to_string()));
    };

    Ok(ContentNode {
        tag,
        attrs,
        inner_markup: markup[inner.0..inner.1].to_string(),
    })
}

fn read_element(start: &BytesStart<'_>) -> Result<(String, Vec<Attribute>), String> {
    let tag = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut attrs = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| format!("bad attribute on <{tag}>: {e}"))?;
        let name = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| format!("bad value for attribute {name}: {e}"))?;
        attrs.push(Attribute::new(name, value.into_owned()));
    }
    Ok((tag, attrs))
}
