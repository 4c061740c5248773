use std::{fmt, str::FromStr, sync::Arc};

use jid::Jid;
use minidom::Element;
use uuid::Uuid;

use crate::error::{StanzaCodecError, StanzaErrorCondition, StanzaErrorType};

pub mod ns {
    pub const JABBER_CLIENT: &str = "jabber:client";
    pub const STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IqType {
    Get,
    Set,
    Result,
    Error,
}

impl IqType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Set => "set",
            Self::Result => "result",
            Self::Error => "error",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "get" => Some(Self::Get),
            "set" => Some(Self::Set),
            "result" => Some(Self::Result),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// `get` and `set` expect an answer; `result` and `error` are answers.
    pub fn is_request(&self) -> bool {
        matches!(self, Self::Get | Self::Set)
    }
}

impl fmt::Display for IqType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MessageType {
    #[default]
    Normal,
    Chat,
    Groupchat,
    Headline,
    Error,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Chat => "chat",
            Self::Groupchat => "groupchat",
            Self::Headline => "headline",
            Self::Error => "error",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "normal" => Some(Self::Normal),
            "chat" => Some(Self::Chat),
            "groupchat" => Some(Self::Groupchat),
            "headline" => Some(Self::Headline),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StanzaKind {
    Iq(IqType),
    Message(MessageType),
    Presence,
}

/// A received or outgoing stanza.
///
/// The element is shared behind an `Arc`, so handing the same inbound stanza
/// to several collectors never copies or mutates it.
#[derive(Debug, Clone)]
pub struct Stanza {
    element: Arc<Element>,
    kind: StanzaKind,
}

impl Stanza {
    pub fn parse(raw: &[u8]) -> Result<Self, StanzaCodecError> {
        let xml = std::str::from_utf8(raw).map_err(|error| {
            StanzaCodecError::ParseFailed(format!("invalid UTF-8 stanza bytes: {error}"))
        })?;
        let trimmed = xml.trim();
        if trimmed.is_empty() {
            return Err(StanzaCodecError::ParseFailed(
                "stanza payload is empty".to_string(),
            ));
        }

        let element = Element::from_str(trimmed).map_err(|error| {
            StanzaCodecError::ParseFailed(format!("failed to parse stanza XML: {error}"))
        })?;
        Self::from_element(element)
    }

    pub fn from_element(element: Element) -> Result<Self, StanzaCodecError> {
        let kind = match element.name() {
            "iq" => {
                let raw_type = element.attr("type").ok_or(StanzaCodecError::MissingAttribute {
                    element: "iq",
                    attribute: "type",
                })?;
                let iq_type =
                    IqType::from_name(raw_type).ok_or_else(|| StanzaCodecError::InvalidAttribute {
                        element: "iq",
                        attribute: "type",
                        value: raw_type.to_string(),
                    })?;
                if element.attr("id").is_none() {
                    return Err(StanzaCodecError::MissingAttribute {
                        element: "iq",
                        attribute: "id",
                    });
                }
                StanzaKind::Iq(iq_type)
            }
            "message" => {
                let message_type = match element.attr("type") {
                    None => MessageType::Normal,
                    Some(raw_type) => MessageType::from_name(raw_type).ok_or_else(|| {
                        StanzaCodecError::InvalidAttribute {
                            element: "message",
                            attribute: "type",
                            value: raw_type.to_string(),
                        }
                    })?,
                };
                StanzaKind::Message(message_type)
            }
            "presence" => StanzaKind::Presence,
            other => return Err(StanzaCodecError::Unsupported(other.to_string())),
        };

        Ok(Self {
            element: Arc::new(element),
            kind,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, StanzaCodecError> {
        let mut payload = Vec::new();
        self.element
            .write_to(&mut payload)
            .map_err(|error| StanzaCodecError::SerializeFailed {
                element: self.name(),
                message: error.to_string(),
            })?;
        Ok(payload)
    }

    /// Build an IQ with a fresh random id.
    pub fn iq(iq_type: IqType, to: Option<&Jid>, payload: Option<Element>) -> Self {
        Self::iq_with_id(iq_type, &Uuid::new_v4().to_string(), to, payload)
    }

    pub fn iq_with_id(
        iq_type: IqType,
        id: &str,
        to: Option<&Jid>,
        payload: Option<Element>,
    ) -> Self {
        let mut element = Element::builder("iq", ns::JABBER_CLIENT)
            .attr("type", iq_type.as_str())
            .attr("id", id)
            .build();
        if let Some(to) = to {
            element.set_attr("to", to.to_string());
        }
        if let Some(payload) = payload {
            element.append_child(payload);
        }

        Self {
            element: Arc::new(element),
            kind: StanzaKind::Iq(iq_type),
        }
    }

    pub fn message(
        message_type: MessageType,
        to: Option<&Jid>,
        payloads: impl IntoIterator<Item = Element>,
    ) -> Self {
        let mut element = Element::builder("message", ns::JABBER_CLIENT)
            .attr("id", Uuid::new_v4().to_string())
            .build();
        if message_type != MessageType::Normal {
            element.set_attr("type", message_type.as_str());
        }
        if let Some(to) = to {
            element.set_attr("to", to.to_string());
        }
        for payload in payloads {
            element.append_child(payload);
        }

        Self {
            element: Arc::new(element),
            kind: StanzaKind::Message(message_type),
        }
    }

    /// Build the `result` answer to an IQ request, addressed back to its sender.
    pub fn iq_result_for(request: &Stanza, payload: Option<Element>) -> Self {
        let mut reply = Self::iq_with_id(
            IqType::Result,
            request.id().unwrap_or_default(),
            request.from().as_ref(),
            payload,
        );
        reply.copy_recipient_as_sender(request);
        reply
    }

    /// Build the `error` answer to an IQ request.
    pub fn iq_error_for(
        request: &Stanza,
        condition: StanzaErrorCondition,
        error_type: StanzaErrorType,
        text: Option<&str>,
    ) -> Self {
        let mut error = Element::builder("error", ns::JABBER_CLIENT)
            .attr("type", error_type.as_str())
            .append(Element::builder(condition.as_str(), ns::STANZAS).build())
            .build();
        if let Some(text) = text {
            let mut text_element = Element::builder("text", ns::STANZAS).build();
            text_element.append_text_node(text);
            error.append_child(text_element);
        }

        let mut reply = Self::iq_with_id(
            IqType::Error,
            request.id().unwrap_or_default(),
            request.from().as_ref(),
            Some(error),
        );
        reply.copy_recipient_as_sender(request);
        reply
    }

    fn copy_recipient_as_sender(&mut self, request: &Stanza) {
        if let Some(to) = request.element.attr("to") {
            Arc::make_mut(&mut self.element).set_attr("from", to);
        }
    }

    /// Set the `from` address, as a server would stamp it on delivery.
    pub fn with_from(mut self, from: &Jid) -> Self {
        Arc::make_mut(&mut self.element).set_attr("from", from.to_string());
        self
    }

    pub fn kind(&self) -> StanzaKind {
        self.kind
    }

    pub fn iq_type(&self) -> Option<IqType> {
        match self.kind {
            StanzaKind::Iq(iq_type) => Some(iq_type),
            _ => None,
        }
    }

    pub fn message_type(&self) -> Option<MessageType> {
        match self.kind {
            StanzaKind::Message(message_type) => Some(message_type),
            _ => None,
        }
    }

    pub fn is_iq_request(&self) -> bool {
        self.iq_type().is_some_and(|iq_type| iq_type.is_request())
    }

    pub fn name(&self) -> &'static str {
        match self.kind {
            StanzaKind::Iq(_) => "iq",
            StanzaKind::Message(_) => "message",
            StanzaKind::Presence => "presence",
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.element.attr("id")
    }

    /// Sender address. A missing or malformed attribute yields `None`.
    pub fn from(&self) -> Option<Jid> {
        self.element.attr("from").and_then(|raw| raw.parse().ok())
    }

    pub fn to(&self) -> Option<Jid> {
        self.element.attr("to").and_then(|raw| raw.parse().ok())
    }

    pub fn element(&self) -> &Element {
        &self.element
    }

    /// The first child element, i.e. the IQ payload.
    pub fn payload(&self) -> Option<&Element> {
        self.element.children().next()
    }

    pub fn child(&self, name: &str, namespace: &str) -> Option<&Element> {
        self.element
            .children()
            .find(|child| child.name() == name && child.ns() == namespace)
    }

    /// Condition, type and text of an `error` IQ.
    pub fn stanza_error(&self) -> Option<(StanzaErrorCondition, StanzaErrorType, Option<String>)> {
        if self.iq_type() != Some(IqType::Error) {
            return None;
        }

        let error = self
            .element
            .children()
            .find(|child| child.name() == "error")?;
        let error_type = error
            .attr("type")
            .and_then(StanzaErrorType::from_name)
            .unwrap_or(StanzaErrorType::Cancel);
        let condition = error
            .children()
            .find(|child| child.ns() == ns::STANZAS && child.name() != "text")
            .map(|child| StanzaErrorCondition::from_name(child.name()))
            .unwrap_or(StanzaErrorCondition::UndefinedCondition);
        let text = error
            .children()
            .find(|child| child.name() == "text" && child.ns() == ns::STANZAS)
            .map(Element::text);

        Some((condition, error_type, text))
    }
}

impl TryFrom<Element> for Stanza {
    type Error = StanzaCodecError;

    fn try_from(element: Element) -> Result<Self, Self::Error> {
        Self::from_element(element)
    }
}
