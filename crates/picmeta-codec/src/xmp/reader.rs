//! Packet parsing

use super::{XmpPacket, ATTRIBUTES_NS, RDF_NS, XMP_NOTE_NS};
use picmeta_common::{Attribute, AttributeSource, Error, Result, Value, ValueType};
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::NsReader;
use tracing::warn;

/// Namespaces the reader cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Ns {
    Attributes,
    Rdf,
    XmpNote,
    Other,
}

impl Ns {
    pub(super) fn of(resolved: &ResolveResult<'_>) -> Self {
        match resolved {
            ResolveResult::Bound(ns) => match ns.as_ref() {
                uri if uri == ATTRIBUTES_NS.as_bytes() => Self::Attributes,
                uri if uri == RDF_NS.as_bytes() => Self::Rdf,
                uri if uri == XMP_NOTE_NS.as_bytes() => Self::XmpNote,
                _ => Self::Other,
            },
            _ => Self::Other,
        }
    }
}

/// Which field of an array entry an element holds
#[derive(Debug, Clone, Copy)]
enum Field {
    Name,
    Type,
    Value,
}

impl Field {
    fn from_local(local: &[u8]) -> Option<Self> {
        match local {
            b"name" => Some(Self::Name),
            b"type" => Some(Self::Type),
            b"value" => Some(Self::Value),
            _ => None,
        }
    }
}

/// Fields collected for one `rdf:li` entry
#[derive(Debug, Default)]
struct Entry {
    name: Option<String>,
    value_type: Option<String>,
    value: Option<String>,
}

impl Entry {
    fn set(&mut self, field: Field, text: String) {
        match field {
            Field::Name => self.name = Some(text),
            Field::Type => self.value_type = Some(text),
            Field::Value => self.value = Some(text),
        }
    }

    /// Turn the entry into an attribute, or log why it is skipped
    fn finish(self) -> Option<Attribute> {
        let Some(name) = self.name.filter(|n| !n.is_empty()) else {
            warn!("Skipping XMP attribute entry without a name");
            return None;
        };
        let Some(type_name) = self.value_type else {
            warn!("Skipping XMP attribute '{}' without a type", name);
            return None;
        };
        let Some(text) = self.value else {
            warn!("Skipping XMP attribute '{}' without a value", name);
            return None;
        };
        let value_type = match type_name.parse::<ValueType>() {
            Ok(ValueType::Image) | Err(_) => {
                warn!(
                    "Skipping XMP attribute '{}' with unsupported type '{}'",
                    name, type_name
                );
                return None;
            }
            Ok(value_type) => value_type,
        };
        match Value::parse(value_type, &text) {
            Ok(value) => Some(Attribute::new(name, value, AttributeSource::Custom)),
            Err(e) => {
                warn!("Skipping XMP attribute '{}': {}", name, e);
                None
            }
        }
    }
}

/// Parse state while walking a packet
#[derive(Default)]
struct State {
    depth: usize,
    /// Depth of the open `attr:attributes` element
    array_depth: Option<usize>,
    /// Depth and collected fields of the open `rdf:li`
    entry: Option<(usize, Entry)>,
    /// Field element whose text is being captured, with its depth
    field: Option<(usize, Field, String)>,
    /// Depth of an open `xmpNote:HasExtendedXMP` element
    guid_depth: Option<usize>,
    guid_text: String,
    packet: XmpPacket,
}

/// Extract the custom attributes and the extended-packet GUID from one XMP
/// packet
///
/// Malformed XML is a decode error at `base` plus the parser position.
/// Malformed array entries are logged and skipped.
pub fn parse_packet(xml: &[u8], base: u64) -> Result<XmpPacket> {
    let mut reader = NsReader::from_reader(xml);
    let mut state = State::default();

    loop {
        let pos = base + reader.buffer_position() as u64;
        let xml_error = |e: &dyn std::fmt::Display| Error::decode(pos, format!("malformed XMP: {e}"));

        let (resolved, event) = reader
            .read_resolved_event()
            .map_err(|e| xml_error(&e))?;
        let ns = Ns::of(&resolved);

        match event {
            Event::Start(e) => {
                on_start(&reader, &mut state, ns, &e, false).map_err(|e| xml_error(&e))?;
                state.depth += 1;
            }
            Event::Empty(e) => {
                on_start(&reader, &mut state, ns, &e, true).map_err(|e| xml_error(&e))?;
            }
            Event::End(_) => {
                state.depth = state.depth.saturating_sub(1);
                on_end(&mut state);
            }
            Event::Text(t) => {
                let text = t.unescape().map_err(|e| xml_error(&e))?;
                append_text(&mut state, &text);
            }
            Event::CData(c) => {
                let text = String::from_utf8_lossy(&c).into_owned();
                append_text(&mut state, &text);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(state.packet)
}

fn on_start(
    reader: &NsReader<&[u8]>,
    state: &mut State,
    ns: Ns,
    e: &BytesStart<'_>,
    empty: bool,
) -> std::result::Result<(), quick_xml::Error> {
    let local = e.local_name();
    let local = local.as_ref();
    let depth = state.depth;

    // GUID announced either as an attribute or as a property element
    if ns == Ns::XmpNote && local == b"HasExtendedXMP" && !empty {
        state.guid_depth = Some(depth);
        state.guid_text.clear();
    }
    for attr in e.attributes() {
        let attr = attr?;
        let (attr_ns, attr_local) = reader.resolve_attribute(attr.key);
        if Ns::of(&attr_ns) == Ns::XmpNote && attr_local.as_ref() == b"HasExtendedXMP" {
            state.packet.extended_guid = Some(attr.unescape_value()?.trim().to_string());
        }
    }

    if state.array_depth.is_none() {
        if ns == Ns::Attributes && local == b"attributes" && !empty {
            state.array_depth = Some(depth);
        }
        return Ok(());
    }

    if state.entry.is_none() {
        if ns == Ns::Rdf && local == b"li" {
            state.entry = Some((depth, Entry::default()));
        } else {
            return Ok(());
        }
    }

    if let Some((_, entry)) = state.entry.as_mut() {
        // Fields written as XML attributes
        for attr in e.attributes() {
            let attr = attr?;
            let (attr_ns, attr_local) = reader.resolve_attribute(attr.key);
            if Ns::of(&attr_ns) != Ns::Attributes {
                continue;
            }
            if let Some(field) = Field::from_local(attr_local.as_ref()) {
                entry.set(field, attr.unescape_value()?.into_owned());
            }
        }

        // Fields written as property elements
        if ns == Ns::Attributes {
            if let Some(field) = Field::from_local(local) {
                if empty {
                    entry.set(field, String::new());
                } else {
                    state.field = Some((depth, field, String::new()));
                }
            }
        }
    }

    if empty {
        // An empty rdf:li closes immediately
        if matches!(state.entry, Some((d, _)) if d == depth) {
            finish_entry(state);
        }
    }
    Ok(())
}

fn on_end(state: &mut State) {
    let depth = state.depth;

    if state.guid_depth == Some(depth) {
        state.guid_depth = None;
        let guid = state.guid_text.trim();
        if !guid.is_empty() {
            state.packet.extended_guid = Some(guid.to_string());
        }
    }

    if matches!(state.field, Some((d, _, _)) if d == depth) {
        if let (Some((_, field, text)), Some((_, entry))) =
            (state.field.take(), state.entry.as_mut())
        {
            entry.set(field, text);
        }
    }

    if matches!(state.entry, Some((d, _)) if d == depth) {
        finish_entry(state);
    }

    if state.array_depth == Some(depth) {
        state.array_depth = None;
    }
}

fn finish_entry(state: &mut State) {
    if let Some((_, entry)) = state.entry.take() {
        state.field = None;
        if let Some(attribute) = entry.finish() {
            state.packet.attributes.push(attribute);
        }
    }
}

fn append_text(state: &mut State, text: &str) {
    if let Some((_, _, buf)) = state.field.as_mut() {
        buf.push_str(text);
    }
    if state.guid_depth.is_some() {
        state.guid_text.push_str(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrap(descriptions: &str) -> String {
        format!(
            r#"<x:xmpmeta xmlns:x="adobe:ns:meta/"><rdf:RDF xmlns:rdf="{RDF_NS}">{descriptions}</rdf:RDF></x:xmpmeta>"#
        )
    }

    #[test]
    fn test_element_and_attribute_forms() {
        let xml = wrap(&format!(
            r#"<rdf:Description rdf:about="" xmlns:attr="{ATTRIBUTES_NS}">
                <attr:attributes><rdf:Bag>
                  <rdf:li rdf:parseType="Resource">
                    <attr:name>rating</attr:name><attr:type>int</attr:type><attr:value>5</attr:value>
                  </rdf:li>
                  <rdf:li attr:name="caption" attr:type="string" attr:value="a &amp; b"/>
                  <rdf:li><rdf:Description attr:name="score" attr:type="real" attr:value="1.5"/></rdf:li>
                </rdf:Bag></attr:attributes>
              </rdf:Description>"#
        ));
        let packet = parse_packet(xml.as_bytes(), 0).unwrap();
        assert_eq!(
            packet.attributes,
            vec![
                Attribute::int("rating", 5),
                Attribute::text("caption", "a & b"),
                Attribute::real("score", 1.5),
            ]
        );
        assert_eq!(packet.extended_guid, None);
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let xml = wrap(&format!(
            r#"<rdf:Description rdf:about="" xmlns:attr="{ATTRIBUTES_NS}">
                <attr:attributes><rdf:Bag>
                  <rdf:li attr:name="no-type" attr:value="1"/>
                  <rdf:li attr:name="bad-int" attr:type="int" attr:value="one"/>
                  <rdf:li attr:name="blob" attr:type="image" attr:value="AAAA"/>
                  <rdf:li attr:type="int" attr:value="1"/>
                  <rdf:li attr:name="no-value" attr:type="string"/>
                  <rdf:li attr:name="weird" attr:type="colour" attr:value="red"/>
                  <rdf:li attr:name="good" attr:type="int" attr:value="7"/>
                </rdf:Bag></attr:attributes>
              </rdf:Description>"#
        ));
        let packet = parse_packet(xml.as_bytes(), 0).unwrap();
        assert_eq!(packet.attributes, vec![Attribute::int("good", 7)]);
    }

    #[test]
    fn test_extended_guid_forms() {
        let as_attribute = wrap(&format!(
            r#"<rdf:Description rdf:about="" xmlns:xmpNote="{XMP_NOTE_NS}" xmpNote:HasExtendedXMP="ABCDEF0123456789ABCDEF0123456789"/>"#
        ));
        let packet = parse_packet(as_attribute.as_bytes(), 0).unwrap();
        assert_eq!(
            packet.extended_guid.as_deref(),
            Some("ABCDEF0123456789ABCDEF0123456789")
        );

        let as_element = wrap(&format!(
            r#"<rdf:Description rdf:about="" xmlns:xmpNote="{XMP_NOTE_NS}"><xmpNote:HasExtendedXMP> 0123 </xmpNote:HasExtendedXMP></rdf:Description>"#
        ));
        let packet = parse_packet(as_element.as_bytes(), 0).unwrap();
        assert_eq!(packet.extended_guid.as_deref(), Some("0123"));
    }

    #[test]
    fn test_foreign_namespace_is_ignored() {
        let xml = wrap(
            r#"<rdf:Description rdf:about="" xmlns:other="http://example.com/ns/">
                <other:attributes><rdf:Bag><rdf:li other:name="x" other:type="int" other:value="1"/></rdf:Bag></other:attributes>
              </rdf:Description>"#,
        );
        assert!(parse_packet(xml.as_bytes(), 0).unwrap().attributes.is_empty());
    }

    #[test]
    fn test_malformed_xml_is_decode_error() {
        let err = parse_packet(b"<x:xmpmeta><rdf:RDF></x:xmpmeta>", 100).unwrap_err();
        assert!(err.is_decode());
        assert!(err.offset().unwrap() >= 100);
    }
}
