//! INDI wire format: outgoing command encoding and inbound stream decoding.
//!
//! The INDI stream is a sequence of top-level XML elements with no enclosing
//! root. Inbound elements are at most two levels deep (a vector and its
//! members), so decoding collects each top-level element into a small tree
//! and then maps it onto [`IndiMessage`].

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::io::BufRead;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::error::{IndiError, IndiResult};
use super::property::{
    Property, PropertyKind, PropertyState, PropertyUpdate, PropertyValue, SwitchState,
};

/// Protocol version announced in `getProperties`.
pub const PROTOCOL_VERSION: &str = "1.7";

/// BLOB delivery policy requested with `enableBLOB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobMode {
    Never,
    Also,
    Only,
}

impl BlobMode {
    fn as_str(&self) -> &'static str {
        match self {
            BlobMode::Never => "Never",
            BlobMode::Also => "Also",
            BlobMode::Only => "Only",
        }
    }
}

/// Binary payload delivered by a `setBLOBVector`.
#[derive(Debug, Clone, PartialEq)]
pub struct BlobPayload {
    pub device: String,
    pub property: String,
    pub element: String,
    /// File extension reported by the driver, e.g. `.fits`
    pub format: String,
    pub data: Vec<u8>,
}

/// Decoded inbound INDI message.
#[derive(Debug, Clone, PartialEq)]
pub enum IndiMessage {
    Define(Property),
    Update(PropertyUpdate),
    Delete {
        device: String,
        name: Option<String>,
    },
    Blob(BlobPayload),
    Message {
        device: Option<String>,
        text: String,
        timestamp: Option<String>,
    },
    /// Server liveness probe; must be answered with [`encode_ping_reply`].
    Ping {
        uid: String,
    },
}

// ==================== Encoding ====================

fn attr(out: &mut String, name: &str, value: &str) {
    let _ = write!(out, " {name}=\"{}\"", escape(value));
}

fn encode_vector<V: std::fmt::Display>(
    kind: PropertyKind,
    device: &str,
    property: &str,
    elements: &[(&str, V)],
) -> String {
    let tag = kind.tag();
    let mut out = format!("<new{tag}Vector");
    attr(&mut out, "device", device);
    attr(&mut out, "name", property);
    out.push_str(">\n");
    for (name, value) in elements {
        out.push_str("  <one");
        out.push_str(tag);
        attr(&mut out, "name", name);
        let _ = write!(out, ">{}</one{tag}>\n", escape(&value.to_string()));
    }
    let _ = write!(out, "</new{tag}Vector>\n");
    out
}

/// Ask the server to (re)define properties, optionally narrowed to one device
/// or one property.
pub fn encode_get_properties(device: Option<&str>, property: Option<&str>) -> String {
    let mut out = String::from("<getProperties");
    attr(&mut out, "version", PROTOCOL_VERSION);
    if let Some(device) = device {
        attr(&mut out, "device", device);
    }
    if let Some(property) = property {
        attr(&mut out, "name", property);
    }
    out.push_str("/>\n");
    out
}

pub fn encode_new_switch(device: &str, property: &str, elements: &[(&str, SwitchState)]) -> String {
    encode_vector(PropertyKind::Switch, device, property, elements)
}

pub fn encode_new_number(device: &str, property: &str, elements: &[(&str, f64)]) -> String {
    encode_vector(PropertyKind::Number, device, property, elements)
}

pub fn encode_new_text(device: &str, property: &str, elements: &[(&str, &str)]) -> String {
    encode_vector(PropertyKind::Text, device, property, elements)
}

pub fn encode_enable_blob(device: &str, property: Option<&str>, mode: BlobMode) -> String {
    let mut out = String::from("<enableBLOB");
    attr(&mut out, "device", device);
    if let Some(property) = property {
        attr(&mut out, "name", property);
    }
    let _ = write!(out, ">{}</enableBLOB>\n", mode.as_str());
    out
}

pub fn encode_ping_reply(uid: &str) -> String {
    let mut out = String::from("<pingReply");
    attr(&mut out, "uid", uid);
    out.push_str("/>\n");
    out
}

// ==================== Decoding ====================

/// Parse an INDI number, which may be plain decimal or sexagesimal
/// (`"-12:30:15.5"` or `"5 23 28"`).
pub fn parse_number(text: &str) -> IndiResult<f64> {
    let text = text.trim();
    if !text.contains(':') && !text.contains(' ') {
        return text
            .parse::<f64>()
            .map_err(|e| IndiError::Parse(format!("'{text}': {e}")));
    }

    let negative = text.starts_with('-');
    let mut value = 0.0;
    let mut scale = 1.0;
    for part in text
        .trim_start_matches(['-', '+'])
        .split([':', ' '])
        .filter(|p| !p.is_empty())
    {
        let component: f64 = part
            .parse()
            .map_err(|e| IndiError::Parse(format!("'{text}': {e}")))?;
        value += component / scale;
        scale *= 60.0;
    }
    Ok(if negative { -value } else { value })
}

fn xml_err<E: std::fmt::Display>(err: E) -> IndiError {
    IndiError::Xml(err.to_string())
}

#[derive(Debug, Default)]
struct RawElement {
    name: String,
    attributes: Vec<(String, String)>,
    text: String,
    children: Vec<RawElement>,
}

impl RawElement {
    fn from_start(start: &BytesStart) -> IndiResult<Self> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attribute in start.attributes() {
            let attribute = attribute.map_err(xml_err)?;
            let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
            let value = attribute.unescape_value().map_err(xml_err)?.into_owned();
            attributes.push((key, value));
        }
        Ok(Self {
            name,
            attributes,
            ..Default::default()
        })
    }

    fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn required_attr(&self, key: &str) -> IndiResult<&str> {
        self.attr(key)
            .ok_or_else(|| IndiError::Xml(format!("<{}> is missing '{key}'", self.name)))
    }
}

/// Split `defNumberVector` into (`def`, `Number`).
fn split_vector_tag(tag: &str) -> Option<(&str, PropertyKind)> {
    let body = tag.strip_suffix("Vector")?;
    for prefix in ["def", "set", "new"] {
        if let Some(kind) = body.strip_prefix(prefix) {
            return PropertyKind::from_tag(kind).map(|kind| (prefix, kind));
        }
    }
    None
}

fn member_value(kind: PropertyKind, member: &RawElement) -> IndiResult<PropertyValue> {
    Ok(match kind {
        PropertyKind::Number => PropertyValue::Number(parse_number(&member.text)?),
        PropertyKind::Switch => PropertyValue::Switch(member.text.parse()?),
        PropertyKind::Text => PropertyValue::Text(member.text.clone()),
        PropertyKind::Light => PropertyValue::Light(member.text.parse()?),
        PropertyKind::Blob => PropertyValue::Blob {
            format: member.attr("format").unwrap_or_default().to_string(),
            size: member
                .attr("size")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(0),
        },
    })
}

fn decode_blob(device: &str, property: &str, member: &RawElement) -> IndiResult<Option<BlobPayload>> {
    let encoded: String = member.text.chars().filter(|c| !c.is_whitespace()).collect();
    if encoded.is_empty() {
        return Ok(None);
    }
    Ok(Some(BlobPayload {
        device: device.to_string(),
        property: property.to_string(),
        element: member.required_attr("name")?.to_string(),
        format: member.attr("format").unwrap_or_default().to_string(),
        data: STANDARD.decode(encoded)?,
    }))
}

fn convert(element: RawElement) -> IndiResult<Vec<IndiMessage>> {
    match element.name.as_str() {
        "delProperty" => {
            return Ok(vec![IndiMessage::Delete {
                device: element.required_attr("device")?.to_string(),
                name: element.attr("name").map(str::to_string),
            }])
        }
        "message" => {
            return Ok(vec![IndiMessage::Message {
                device: element.attr("device").map(str::to_string),
                text: element.attr("message").unwrap_or_default().to_string(),
                timestamp: element.attr("timestamp").map(str::to_string),
            }])
        }
        "pingRequest" => {
            return Ok(vec![IndiMessage::Ping {
                uid: element.attr("uid").unwrap_or_default().to_string(),
            }])
        }
        _ => {}
    }

    let Some((prefix, kind)) = split_vector_tag(&element.name) else {
        return Ok(Vec::new());
    };
    let device = element.required_attr("device")?;
    let name = element.required_attr("name")?;
    let state = element
        .attr("state")
        .map(str::parse::<PropertyState>)
        .transpose()?;

    let mut members = Vec::with_capacity(element.children.len());
    let mut blobs = Vec::new();
    for member in &element.children {
        let member_name = member.required_attr("name")?;
        members.push((member_name.to_string(), member_value(kind, member)?));
        if kind == PropertyKind::Blob && prefix == "set" {
            if let Some(blob) = decode_blob(device, name, member)? {
                blobs.push(IndiMessage::Blob(blob));
            }
        }
    }

    let message = match prefix {
        "def" => IndiMessage::Define(Property {
            device: device.to_string(),
            name: name.to_string(),
            kind,
            state: state.unwrap_or_default(),
            label: element.attr("label").map(str::to_string),
            group: element.attr("group").map(str::to_string),
            elements: members,
        }),
        "set" => IndiMessage::Update(PropertyUpdate {
            device: device.to_string(),
            name: name.to_string(),
            kind,
            state,
            elements: members,
        }),
        // new*Vector only flows client -> server
        _ => return Ok(Vec::new()),
    };

    let mut messages = vec![message];
    messages.extend(blobs);
    Ok(messages)
}

/// Pull-based decoder over any buffered byte source (normally a TCP stream).
///
/// Reads block until a complete top-level element is available, so elements
/// split across socket reads decode exactly as if they arrived at once.
pub struct MessageDecoder<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    pending: VecDeque<IndiMessage>,
}

impl<R: BufRead> MessageDecoder<R> {
    pub fn new(source: R) -> Self {
        let mut reader = Reader::from_reader(source);
        reader.config_mut().trim_text(true);
        Self {
            reader,
            buf: Vec::new(),
            pending: VecDeque::new(),
        }
    }

    /// Next decoded message, or `None` once the stream ends cleanly.
    ///
    /// Top-level elements that are not part of the client-facing protocol
    /// are skipped.
    pub fn next_message(&mut self) -> IndiResult<Option<IndiMessage>> {
        loop {
            if let Some(message) = self.pending.pop_front() {
                return Ok(Some(message));
            }
            match self.next_element()? {
                Some(element) => self.pending.extend(convert(element)?),
                None => return Ok(None),
            }
        }
    }

    fn next_element(&mut self) -> IndiResult<Option<RawElement>> {
        let mut stack: Vec<RawElement> = Vec::new();
        loop {
            self.buf.clear();
            match self.reader.read_event_into(&mut self.buf).map_err(xml_err)? {
                Event::Start(start) => stack.push(RawElement::from_start(&start)?),
                Event::Empty(start) => {
                    let element = RawElement::from_start(&start)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None => return Ok(Some(element)),
                    }
                }
                Event::Text(text) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&text.unescape().map_err(xml_err)?);
                    }
                }
                Event::CData(data) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                    }
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| IndiError::Xml("unbalanced end tag".to_string()))?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None => return Ok(Some(element)),
                    }
                }
                Event::Eof => {
                    return if stack.is_empty() {
                        Ok(None)
                    } else {
                        Err(IndiError::Disconnected)
                    };
                }
                _ => {}
            }
        }
    }
}
