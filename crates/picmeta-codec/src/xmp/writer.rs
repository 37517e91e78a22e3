//! Packet serialization
//!
//! An existing packet is re-emitted event by event. Top-level
//! `rdf:Description` elements are buffered so our own properties can be
//! filtered out; a description left without any property is dropped.

use super::reader::Ns;
use super::{ATTRIBUTES_NS, ATTRIBUTES_PREFIX, RDF_NS, XMP_NOTE_NS, X_NS};
use picmeta_common::{Attribute, Error, Result};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{NsReader, Writer};
use std::fmt::Display;

const XPACKET_BEGIN: &[u8] = b"<?xpacket begin=\"\xEF\xBB\xBF\" id=\"W5M0MpCehiHzreSzNTczkc9d\"?>\n";
const XPACKET_END: &[u8] = b"\n<?xpacket end=\"w\"?>";

/// What goes into our own description
pub(super) enum Payload<'a> {
    /// Nothing: only foreign content survives
    Nothing,
    /// The attribute array itself
    Attributes(&'a [&'a Attribute]),
    /// Stub announcing an extended packet
    ExtendedStub(&'a str),
}

fn write_error(e: impl Display) -> Error {
    Error::encode("xmp", e.to_string())
}

type XmlWriter = Writer<Vec<u8>>;

fn new_writer() -> XmlWriter {
    Writer::new_with_indent(Vec::new(), b' ', 1)
}

fn emit(writer: &mut XmlWriter, event: Event<'_>) -> Result<()> {
    writer.write_event(event).map_err(write_error)
}

/// Build the packet body (without the `xpacket` wrapper)
///
/// Foreign content of `existing` is kept and `payload` is added before
/// `</rdf:RDF>`. Returns the body and how many foreign descriptions were
/// kept.
pub(super) fn build_packet(existing: Option<&[u8]>, payload: Payload<'_>) -> Result<(Vec<u8>, usize)> {
    if let Some(xml) = existing {
        if let Some(rewritten) = rewrite(xml, &payload)? {
            return Ok(rewritten);
        }
    }

    let mut writer = new_writer();
    open_document(&mut writer)?;
    write_payload(&mut writer, &payload)?;
    close_document(&mut writer)?;
    Ok((writer.into_inner(), 0))
}

/// Standalone packet holding only the attribute array, for the extended
/// segments
pub(super) fn build_extended(attributes: &[&Attribute]) -> Result<Vec<u8>> {
    let mut writer = new_writer();
    open_document(&mut writer)?;
    write_attributes(&mut writer, attributes)?;
    close_document(&mut writer)?;
    Ok(writer.into_inner())
}

/// Add the `xpacket` processing instructions around a body
pub(super) fn wrap_packet(body: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(XPACKET_BEGIN.len() + body.len() + XPACKET_END.len());
    packet.extend_from_slice(XPACKET_BEGIN);
    packet.extend_from_slice(body);
    packet.extend_from_slice(XPACKET_END);
    packet
}

fn open_document(writer: &mut XmlWriter) -> Result<()> {
    let mut meta = BytesStart::new("x:xmpmeta");
    meta.push_attribute(("xmlns:x", X_NS));
    emit(writer, Event::Start(meta))?;
    let mut rdf = BytesStart::new("rdf:RDF");
    rdf.push_attribute(("xmlns:rdf", RDF_NS));
    emit(writer, Event::Start(rdf))
}

fn close_document(writer: &mut XmlWriter) -> Result<()> {
    emit(writer, Event::End(BytesEnd::new("rdf:RDF")))?;
    emit(writer, Event::End(BytesEnd::new("x:xmpmeta")))
}

fn write_payload(writer: &mut XmlWriter, payload: &Payload<'_>) -> Result<()> {
    match payload {
        Payload::Nothing => Ok(()),
        Payload::Attributes(attributes) => write_attributes(writer, attributes),
        Payload::ExtendedStub(guid) => {
            let mut desc = BytesStart::new("rdf:Description");
            desc.push_attribute(("rdf:about", ""));
            desc.push_attribute(("xmlns:xmpNote", XMP_NOTE_NS));
            desc.push_attribute(("xmpNote:HasExtendedXMP", *guid));
            emit(writer, Event::Empty(desc))
        }
    }
}

fn write_attributes(writer: &mut XmlWriter, attributes: &[&Attribute]) -> Result<()> {
    let array = format!("{ATTRIBUTES_PREFIX}:attributes");
    let name = format!("{ATTRIBUTES_PREFIX}:name");
    let value_type = format!("{ATTRIBUTES_PREFIX}:type");
    let value = format!("{ATTRIBUTES_PREFIX}:value");

    let mut desc = BytesStart::new("rdf:Description");
    desc.push_attribute(("rdf:about", ""));
    desc.push_attribute((format!("xmlns:{ATTRIBUTES_PREFIX}").as_str(), ATTRIBUTES_NS));
    emit(writer, Event::Start(desc))?;
    emit(writer, Event::Start(BytesStart::new(array.as_str())))?;
    emit(writer, Event::Start(BytesStart::new("rdf:Bag")))?;

    for attribute in attributes {
        let Some(text) = attribute.value().to_canonical_string() else {
            continue;
        };
        let mut li = BytesStart::new("rdf:li");
        li.push_attribute(("rdf:parseType", "Resource"));
        emit(writer, Event::Start(li))?;
        text_element(writer, &name, attribute.name())?;
        text_element(writer, &value_type, attribute.value_type().name())?;
        text_element(writer, &value, &text)?;
        emit(writer, Event::End(BytesEnd::new("rdf:li")))?;
    }

    emit(writer, Event::End(BytesEnd::new("rdf:Bag")))?;
    emit(writer, Event::End(BytesEnd::new(array.as_str())))?;
    emit(writer, Event::End(BytesEnd::new("rdf:Description")))
}

fn text_element(writer: &mut XmlWriter, name: &str, text: &str) -> Result<()> {
    emit(writer, Event::Start(BytesStart::new(name)))?;
    emit(writer, Event::Text(BytesText::new(text)))?;
    emit(writer, Event::End(BytesEnd::new(name)))
}

/// Properties we own inside any description
fn is_own_property(ns: Ns, local: &[u8]) -> bool {
    ns == Ns::Attributes || (ns == Ns::XmpNote && local == b"HasExtendedXMP")
}

/// A top-level description being buffered
struct Buffered {
    depth: usize,
    start: BytesStart<'static>,
    /// Property attributes left on the start tag
    properties: usize,
    /// Property elements left inside
    children: usize,
    events: Vec<Event<'static>>,
}

impl Buffered {
    fn is_empty(&self) -> bool {
        self.properties == 0 && self.children == 0
    }
}

/// Copy of a description start tag without our own property attributes
fn filtered_start(
    reader: &NsReader<&[u8]>,
    e: &BytesStart<'_>,
) -> std::result::Result<(BytesStart<'static>, usize), quick_xml::Error> {
    let mut start = BytesStart::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());
    let mut properties = 0;
    for attr in e.attributes() {
        let attr = attr?;
        let (ns, local) = reader.resolve_attribute(attr.key);
        let ns = Ns::of(&ns);
        if is_own_property(ns, local.as_ref()) {
            continue;
        }
        let key = attr.key.as_ref();
        let is_declaration = key == b"xmlns" || key.starts_with(b"xmlns:");
        if !is_declaration && !(ns == Ns::Rdf && local.as_ref() == b"about") {
            properties += 1;
        }
        start.push_attribute(attr);
    }
    Ok((start, properties))
}

/// Re-emit `xml` without our own properties, inserting `payload` at the end
/// of `rdf:RDF`
///
/// Returns `None` when the packet has no `rdf:RDF` element to insert into.
fn rewrite(xml: &[u8], payload: &Payload<'_>) -> Result<Option<(Vec<u8>, usize)>> {
    let mut reader = NsReader::from_reader(xml);
    let mut writer = new_writer();
    let mut depth = 0usize;
    let mut rdf_depth: Option<usize> = None;
    let mut buffered: Option<Buffered> = None;
    let mut kept = 0usize;
    let mut inserted = false;
    // Whitespace is layout between elements, content inside a leaf
    let mut last_start = false;
    let mut blank: Option<BytesText<'static>> = None;

    loop {
        let pos = reader.buffer_position() as u64;
        let read_error = |e: &dyn Display| Error::decode(pos, format!("malformed XMP: {e}"));

        let (resolved, event) = reader.read_resolved_event().map_err(|e| read_error(&e))?;
        let ns = Ns::of(&resolved);
        let after_start = last_start;
        last_start = matches!(event, Event::Start(_));
        let held_blank = blank.take();

        match event {
            Event::Start(e) => {
                let local = e.local_name();
                if let Some(desc) = buffered.as_mut() {
                    let direct_child = depth == desc.depth + 1;
                    if direct_child && is_own_property(ns, local.as_ref()) {
                        reader.read_to_end(e.name()).map_err(|e| read_error(&e))?;
                        last_start = false;
                        continue;
                    }
                    if direct_child {
                        desc.children += 1;
                    }
                    desc.events.push(Event::Start(e.into_owned()));
                } else if rdf_depth.is_some_and(|d| depth == d + 1)
                    && ns == Ns::Rdf
                    && local.as_ref() == b"Description"
                {
                    let (start, properties) =
                        filtered_start(&reader, &e).map_err(|e| read_error(&e))?;
                    buffered = Some(Buffered {
                        depth,
                        start,
                        properties,
                        children: 0,
                        events: Vec::new(),
                    });
                } else {
                    if rdf_depth.is_none() && !inserted && ns == Ns::Rdf && local.as_ref() == b"RDF" {
                        rdf_depth = Some(depth);
                    }
                    emit(&mut writer, Event::Start(e))?;
                }
                depth += 1;
            }
            Event::Empty(e) => {
                let local = e.local_name();
                if let Some(desc) = buffered.as_mut() {
                    let direct_child = depth == desc.depth + 1;
                    if direct_child && is_own_property(ns, local.as_ref()) {
                        continue;
                    }
                    if direct_child {
                        desc.children += 1;
                    }
                    desc.events.push(Event::Empty(e.into_owned()));
                } else if rdf_depth.is_some_and(|d| depth == d + 1)
                    && ns == Ns::Rdf
                    && local.as_ref() == b"Description"
                {
                    let (start, properties) =
                        filtered_start(&reader, &e).map_err(|e| read_error(&e))?;
                    if properties > 0 {
                        emit(&mut writer, Event::Empty(start))?;
                        kept += 1;
                    }
                } else {
                    emit(&mut writer, Event::Empty(e))?;
                }
            }
            Event::End(e) => {
                if let Some(text) = held_blank {
                    match buffered.as_mut() {
                        Some(desc) => desc.events.push(Event::Text(text)),
                        None => emit(&mut writer, Event::Text(text))?,
                    }
                }
                depth = depth.saturating_sub(1);
                match buffered.take() {
                    Some(desc) if desc.depth == depth => {
                        if !desc.is_empty() {
                            emit(&mut writer, Event::Start(desc.start))?;
                            for event in desc.events {
                                emit(&mut writer, event)?;
                            }
                            emit(&mut writer, Event::End(e))?;
                            kept += 1;
                        }
                    }
                    Some(mut desc) => {
                        desc.events.push(Event::End(e.into_owned()));
                        buffered = Some(desc);
                    }
                    None => {
                        if rdf_depth == Some(depth) {
                            write_payload(&mut writer, payload)?;
                            rdf_depth = None;
                            inserted = true;
                        }
                        emit(&mut writer, Event::End(e))?;
                    }
                }
            }
            Event::Text(t) => {
                if t.iter().all(u8::is_ascii_whitespace) {
                    if after_start {
                        blank = Some(t.into_owned());
                    }
                    continue;
                }
                match buffered.as_mut() {
                    Some(desc) => desc.events.push(Event::Text(t.into_owned())),
                    None => emit(&mut writer, Event::Text(t))?,
                }
            }
            Event::CData(c) => match buffered.as_mut() {
                Some(desc) => desc.events.push(Event::CData(c.into_owned())),
                None => emit(&mut writer, Event::CData(c))?,
            },
            Event::Eof => break,
            // xpacket instructions, declarations and comments are regenerated
            // or dropped
            _ => {}
        }
    }

    if !inserted {
        return Ok(None);
    }
    Ok(Some((writer.into_inner(), kept)))
}
