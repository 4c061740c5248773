//! Wire model for `urn:xmpp:iot:sensordata` (XEP-0323) elements.

use chrono::{DateTime, SecondsFormat, Utc};
use jid::Jid;
use minidom::Element;

use crate::{
    error::StanzaCodecError,
    stanza::{IqType, Stanza},
};

pub const NAMESPACE: &str = "urn:xmpp:iot:sensordata";

/// Identifies one node of a concentrator. The empty value addresses a thing
/// that is not behind a concentrator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct NodeInfo {
    pub node_id: Option<String>,
    pub source_id: Option<String>,
    pub cache_type: Option<String>,
}

impl NodeInfo {
    pub const EMPTY: NodeInfo = NodeInfo {
        node_id: None,
        source_id: None,
        cache_type: None,
    };

    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: Some(node_id.into()),
            ..Self::default()
        }
    }

    pub fn with_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    pub fn with_cache_type(mut self, cache_type: impl Into<String>) -> Self {
        self.cache_type = Some(cache_type.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.node_id.is_none()
    }

    pub(crate) fn from_element(element: &Element) -> Self {
        Self {
            node_id: element.attr("nodeId").map(str::to_string),
            source_id: element.attr("sourceId").map(str::to_string),
            cache_type: element.attr("cacheType").map(str::to_string),
        }
    }

    fn write_attrs(&self, element: &mut Element) {
        let attrs = [
            ("nodeId", &self.node_id),
            ("sourceId", &self.source_id),
            ("cacheType", &self.cache_type),
        ];
        for (name, value) in attrs {
            if let Some(value) = value {
                element.set_attr(name, value.as_str());
            }
        }
    }
}

/// `<req/>`: ask a thing to read out its sensor values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRequest {
    pub seq_nr: u64,
    pub momentary: bool,
}

impl DataRequest {
    pub const ELEMENT: &'static str = "req";

    pub fn momentary(seq_nr: u64) -> Self {
        Self {
            seq_nr,
            momentary: true,
        }
    }

    pub fn to_element(&self) -> Element {
        let mut element = Element::builder(Self::ELEMENT, NAMESPACE)
            .attr("seqnr", self.seq_nr.to_string())
            .build();
        if self.momentary {
            element.set_attr("momentary", "true");
        }
        element
    }

    /// Wrap the request in an IQ `get` addressed to `to`.
    pub fn into_iq(self, to: &Jid) -> Stanza {
        Stanza::iq(IqType::Get, Some(to), Some(self.to_element()))
    }

    pub fn from_element(element: &Element) -> Result<Self, StanzaCodecError> {
        expect_element(element, Self::ELEMENT, "req")?;
        Ok(Self {
            seq_nr: seq_nr_attr(element, "req")?,
            momentary: bool_attr(element, "req", "momentary")?,
        })
    }

    pub fn from_stanza(stanza: &Stanza) -> Result<Self, StanzaCodecError> {
        let element = stanza
            .child(Self::ELEMENT, NAMESPACE)
            .ok_or_else(|| StanzaCodecError::Unsupported(stanza.name().to_string()))?;
        Self::from_element(element)
    }
}

/// `<accepted/>`: the thing took the request and will deliver results later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOutAccepted {
    pub seq_nr: u64,
    pub queued: bool,
}

impl ReadOutAccepted {
    pub const ELEMENT: &'static str = "accepted";

    pub fn new(seq_nr: u64) -> Self {
        Self {
            seq_nr,
            queued: false,
        }
    }

    pub fn to_element(&self) -> Element {
        let mut element = Element::builder(Self::ELEMENT, NAMESPACE)
            .attr("seqnr", self.seq_nr.to_string())
            .build();
        if self.queued {
            element.set_attr("queued", "true");
        }
        element
    }

    pub fn from_element(element: &Element) -> Result<Self, StanzaCodecError> {
        expect_element(element, Self::ELEMENT, "accepted")?;
        Ok(Self {
            seq_nr: seq_nr_attr(element, "accepted")?,
            queued: bool_attr(element, "accepted", "queued")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Int(i64),
    Boolean(bool),
}

/// One named sensor value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataField {
    pub name: String,
    pub value: FieldValue,
}

impl DataField {
    pub fn int(name: impl Into<String>, value: i64) -> Self {
        Self {
            name: name.into(),
            value: FieldValue::Int(value),
        }
    }

    pub fn boolean(name: impl Into<String>, value: bool) -> Self {
        Self {
            name: name.into(),
            value: FieldValue::Boolean(value),
        }
    }

    fn to_element(&self) -> Element {
        let (tag, value) = match &self.value {
            FieldValue::Int(value) => ("int", value.to_string()),
            FieldValue::Boolean(value) => ("boolean", value.to_string()),
        };
        Element::builder(tag, NAMESPACE)
            .attr("name", self.name.as_str())
            .attr("value", value)
            .build()
    }

    /// `None` for field types this crate does not model.
    fn from_element(element: &Element) -> Result<Option<Self>, StanzaCodecError> {
        let element_name: &'static str = match element.name() {
            "int" => "int",
            "boolean" => "boolean",
            _ => return Ok(None),
        };
        let name = element.attr("name").ok_or(StanzaCodecError::MissingAttribute {
            element: element_name,
            attribute: "name",
        })?;
        let raw = element.attr("value").ok_or(StanzaCodecError::MissingAttribute {
            element: element_name,
            attribute: "value",
        })?;

        let invalid = || StanzaCodecError::InvalidAttribute {
            element: element_name,
            attribute: "value",
            value: raw.to_string(),
        };
        let value = match element_name {
            "int" => FieldValue::Int(raw.parse().map_err(|_| invalid())?),
            _ => FieldValue::Boolean(parse_xs_bool(raw).ok_or_else(invalid)?),
        };
        Ok(Some(Self {
            name: name.to_string(),
            value,
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampElement {
    pub value: DateTime<Utc>,
    pub fields: Vec<DataField>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeElement {
    pub node_info: NodeInfo,
    pub timestamps: Vec<TimestampElement>,
}

impl NodeElement {
    /// Every field of the node, across timestamps.
    pub fn fields(&self) -> impl Iterator<Item = &DataField> {
        self.timestamps
            .iter()
            .flat_map(|timestamp| timestamp.fields.iter())
    }
}

/// `<fields/>`: a batch of read-out results, possibly the last one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldsExtension {
    pub seq_nr: u64,
    pub done: bool,
    pub nodes: Vec<NodeElement>,
}

impl FieldsExtension {
    pub const ELEMENT: &'static str = "fields";

    /// A single node stamped with the current time.
    pub fn build_for(seq_nr: u64, done: bool, node_info: NodeInfo, fields: Vec<DataField>) -> Self {
        Self {
            seq_nr,
            done,
            nodes: vec![NodeElement {
                node_info,
                timestamps: vec![TimestampElement {
                    value: Utc::now(),
                    fields,
                }],
            }],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn to_element(&self) -> Element {
        let mut element = Element::builder(Self::ELEMENT, NAMESPACE)
            .attr("seqnr", self.seq_nr.to_string())
            .build();
        if self.done {
            element.set_attr("done", "true");
        }

        for node in &self.nodes {
            let mut node_element = Element::builder("node", NAMESPACE).build();
            node.node_info.write_attrs(&mut node_element);
            for timestamp in &node.timestamps {
                let mut timestamp_element = Element::builder("timestamp", NAMESPACE)
                    .attr(
                        "value",
                        timestamp.value.to_rfc3339_opts(SecondsFormat::Millis, true),
                    )
                    .build();
                for field in &timestamp.fields {
                    timestamp_element.append_child(field.to_element());
                }
                node_element.append_child(timestamp_element);
            }
            element.append_child(node_element);
        }
        element
    }

    pub fn from_element(element: &Element) -> Result<Self, StanzaCodecError> {
        expect_element(element, Self::ELEMENT, "fields")?;
        let seq_nr = seq_nr_attr(element, "fields")?;
        let done = bool_attr(element, "fields", "done")?;

        let mut nodes = Vec::new();
        for node_element in element.children().filter(|child| child.is("node", NAMESPACE)) {
            let mut timestamps = Vec::new();
            for timestamp_element in node_element
                .children()
                .filter(|child| child.is("timestamp", NAMESPACE))
            {
                let raw = timestamp_element.attr("value").ok_or(
                    StanzaCodecError::MissingAttribute {
                        element: "timestamp",
                        attribute: "value",
                    },
                )?;
                let value = DateTime::parse_from_rfc3339(raw)
                    .map_err(|_| StanzaCodecError::InvalidAttribute {
                        element: "timestamp",
                        attribute: "value",
                        value: raw.to_string(),
                    })?
                    .with_timezone(&Utc);

                let mut fields = Vec::new();
                for field_element in timestamp_element.children() {
                    if let Some(field) = DataField::from_element(field_element)? {
                        fields.push(field);
                    }
                }
                timestamps.push(TimestampElement { value, fields });
            }
            nodes.push(NodeElement {
                node_info: NodeInfo::from_element(node_element),
                timestamps,
            });
        }

        Ok(Self {
            seq_nr,
            done,
            nodes,
        })
    }

    /// The extension carried by a stanza, if it has one.
    pub fn from_stanza(stanza: &Stanza) -> Option<Result<Self, StanzaCodecError>> {
        stanza
            .child(Self::ELEMENT, NAMESPACE)
            .map(Self::from_element)
    }
}

fn expect_element(
    element: &Element,
    name: &str,
    label: &'static str,
) -> Result<(), StanzaCodecError> {
    if element.is(name, NAMESPACE) {
        Ok(())
    } else {
        Err(StanzaCodecError::Unsupported(label.to_string()))
    }
}

pub(crate) fn seq_nr_attr(element: &Element, label: &'static str) -> Result<u64, StanzaCodecError> {
    let raw = element.attr("seqnr").ok_or(StanzaCodecError::MissingAttribute {
        element: label,
        attribute: "seqnr",
    })?;
    raw.parse().map_err(|_| StanzaCodecError::InvalidAttribute {
        element: label,
        attribute: "seqnr",
        value: raw.to_string(),
    })
}

/// Optional `xs:boolean` attribute, absent meaning `false`.
pub(crate) fn bool_attr(
    element: &Element,
    label: &'static str,
    attribute: &'static str,
) -> Result<bool, StanzaCodecError> {
    match element.attr(attribute) {
        None => Ok(false),
        Some(raw) => parse_xs_bool(raw).ok_or_else(|| StanzaCodecError::InvalidAttribute {
            element: label,
            attribute,
            value: raw.to_string(),
        }),
    }
}

fn parse_xs_bool(raw: &str) -> Option<bool> {
    match raw {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESULT_MESSAGE: &str = "<message xmlns='jabber:client' from='sensor@example.com/node'>\
        <fields xmlns='urn:xmpp:iot:sensordata' seqnr='7' done='true'>\
        <node nodeId='boiler'>\
        <timestamp value='2026-03-01T10:15:00Z'>\
        <int name='temperature' value='21'/>\
        <boolean name='heating' value='1'/>\
        <string name='label' value='ignored'/>\
        </timestamp></node></fields></message>";

    #[test]
    fn parses_fields_from_message() {
        let stanza = Stanza::parse(RESULT_MESSAGE.as_bytes()).unwrap();
        let fields = FieldsExtension::from_stanza(&stanza).unwrap().unwrap();

        assert_eq!(fields.seq_nr, 7);
        assert!(fields.done);
        assert_eq!(fields.nodes.len(), 1);
        let node = &fields.nodes[0];
        assert_eq!(node.node_info, NodeInfo::new("boiler"));
        assert_eq!(
            node.fields().cloned().collect::<Vec<_>>(),
            vec![
                DataField::int("temperature", 21),
                DataField::boolean("heating", true)
            ]
        );
    }

    #[test]
    fn built_fields_survive_the_wire() {
        let built = FieldsExtension::build_for(
            3,
            true,
            NodeInfo::new("pump").with_source_id("plant"),
            vec![DataField::int("rpm", -4), DataField::boolean("on", false)],
        );
        let stanza = Stanza::message(Default::default(), None, [built.to_element()]);
        let bytes = stanza.to_bytes().unwrap();

        let parsed = FieldsExtension::from_stanza(&Stanza::parse(&bytes).unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(parsed.seq_nr, 3);
        assert_eq!(parsed.nodes[0].node_info, built.nodes[0].node_info);
        assert_eq!(
            parsed.nodes[0].fields().collect::<Vec<_>>(),
            built.nodes[0].fields().collect::<Vec<_>>()
        );
    }

    #[test]
    fn request_defaults_to_non_momentary() {
        let element: Element = "<req xmlns='urn:xmpp:iot:sensordata' seqnr='12'/>"
            .parse()
            .unwrap();
        assert_eq!(
            DataRequest::from_element(&element).unwrap(),
            DataRequest {
                seq_nr: 12,
                momentary: false
            }
        );
        assert!(DataRequest::from_element(&DataRequest::momentary(12).to_element())
            .unwrap()
            .momentary);
    }

    #[test]
    fn rejects_malformed_sequence_numbers() {
        let element: Element = "<accepted xmlns='urn:xmpp:iot:sensordata' seqnr='x'/>"
            .parse()
            .unwrap();
        assert!(matches!(
            ReadOutAccepted::from_element(&element),
            Err(StanzaCodecError::InvalidAttribute {
                attribute: "seqnr",
                ..
            })
        ));

        let missing: Element = "<fields xmlns='urn:xmpp:iot:sensordata'/>".parse().unwrap();
        assert!(matches!(
            FieldsExtension::from_element(&missing),
            Err(StanzaCodecError::MissingAttribute {
                attribute: "seqnr",
                ..
            })
        ));
    }

    #[test]
    fn message_without_fields_has_no_extension() {
        let stanza = Stanza::parse(b"<message xmlns='jabber:client'><body>hi</body></message>")
            .unwrap();
        assert!(FieldsExtension::from_stanza(&stanza).is_none());
    }
}
