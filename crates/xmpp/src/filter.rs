//! Composable stanza predicates.
//!
//! Filters decide which inbound stanzas a collector keeps. They are pure
//! functions of the stanza: no state beyond their parameters and no side
//! effects, so the reading path can evaluate them without coordination.

use jid::Jid;

use crate::stanza::{IqType, MessageType, Stanza, StanzaKind};

pub trait StanzaFilter: Send + Sync + 'static {
    fn accept(&self, stanza: &Stanza) -> bool;
}

impl StanzaFilter for Box<dyn StanzaFilter> {
    fn accept(&self, stanza: &Stanza) -> bool {
        (**self).accept(stanza)
    }
}

pub trait StanzaFilterExt: StanzaFilter + Sized {
    fn and<F: StanzaFilter>(self, other: F) -> AndFilter {
        AndFilter::new().with(self).with(other)
    }

    fn or<F: StanzaFilter>(self, other: F) -> OrFilter {
        OrFilter::new().with(self).with(other)
    }

    fn negate(self) -> NotFilter<Self> {
        NotFilter(self)
    }

    fn boxed(self) -> Box<dyn StanzaFilter> {
        Box::new(self)
    }
}

impl<T: StanzaFilter> StanzaFilterExt for T {}

/// Accepts a stanza only if every inner filter accepts it. An empty `AndFilter`
/// accepts everything.
#[derive(Default)]
pub struct AndFilter {
    filters: Vec<Box<dyn StanzaFilter>>,
}

impl AndFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<F: StanzaFilter>(mut self, filter: F) -> Self {
        self.filters.push(Box::new(filter));
        self
    }
}

impl StanzaFilter for AndFilter {
    fn accept(&self, stanza: &Stanza) -> bool {
        self.filters.iter().all(|filter| filter.accept(stanza))
    }
}

/// Accepts a stanza if any inner filter accepts it. An empty `OrFilter`
/// accepts nothing.
#[derive(Default)]
pub struct OrFilter {
    filters: Vec<Box<dyn StanzaFilter>>,
}

impl OrFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<F: StanzaFilter>(mut self, filter: F) -> Self {
        self.filters.push(Box::new(filter));
        self
    }
}

impl StanzaFilter for OrFilter {
    fn accept(&self, stanza: &Stanza) -> bool {
        self.filters.iter().any(|filter| filter.accept(stanza))
    }
}

pub struct NotFilter<F>(pub F);

impl<F: StanzaFilter> StanzaFilter for NotFilter<F> {
    fn accept(&self, stanza: &Stanza) -> bool {
        !self.0.accept(stanza)
    }
}

/// Adapts a plain function or closure.
pub struct FnFilter<F>(F);

pub fn filter_fn<F>(predicate: F) -> FnFilter<F>
where
    F: Fn(&Stanza) -> bool + Send + Sync + 'static,
{
    FnFilter(predicate)
}

impl<F> StanzaFilter for FnFilter<F>
where
    F: Fn(&Stanza) -> bool + Send + Sync + 'static,
{
    fn accept(&self, stanza: &Stanza) -> bool {
        (self.0)(stanza)
    }
}

/// Accepts every stanza.
pub struct AcceptAll;

impl StanzaFilter for AcceptAll {
    fn accept(&self, _stanza: &Stanza) -> bool {
        true
    }
}

/// Matches on the top-level stanza element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StanzaKindFilter {
    Iq,
    Message,
    Presence,
}

impl StanzaFilter for StanzaKindFilter {
    fn accept(&self, stanza: &Stanza) -> bool {
        matches!(
            (self, stanza.kind()),
            (Self::Iq, StanzaKind::Iq(_))
                | (Self::Message, StanzaKind::Message(_))
                | (Self::Presence, StanzaKind::Presence)
        )
    }
}

/// Matches messages of one type. Non-message stanzas never match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageTypeFilter(MessageType);

impl MessageTypeFilter {
    pub const NORMAL: Self = Self(MessageType::Normal);
    pub const CHAT: Self = Self(MessageType::Chat);
    pub const GROUPCHAT: Self = Self(MessageType::Groupchat);
    pub const HEADLINE: Self = Self(MessageType::Headline);
    pub const ERROR: Self = Self(MessageType::Error);

    pub fn message_type(&self) -> MessageType {
        self.0
    }
}

impl StanzaFilter for MessageTypeFilter {
    fn accept(&self, stanza: &Stanza) -> bool {
        stanza.message_type() == Some(self.0)
    }
}

/// Matches stanzas whose `from` equals the given address exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct FromFilter(Jid);

impl FromFilter {
    pub fn new(from: Jid) -> Self {
        Self(from)
    }
}

impl StanzaFilter for FromFilter {
    fn accept(&self, stanza: &Stanza) -> bool {
        stanza.from().as_ref() == Some(&self.0)
    }
}

/// Matches the `result` or `error` answer to one IQ request.
///
/// The reply must carry the request's id and come from the address the
/// request was sent to. A request without `to` is answered by our own server,
/// which may or may not stamp a `from`, so any sender is accepted then.
#[derive(Debug, Clone, PartialEq)]
pub struct IqReplyFilter {
    id: String,
    to: Option<Jid>,
}

impl IqReplyFilter {
    pub fn new(request: &Stanza) -> Self {
        Self {
            id: request.id().unwrap_or_default().to_string(),
            to: request.to(),
        }
    }
}

impl StanzaFilter for IqReplyFilter {
    fn accept(&self, stanza: &Stanza) -> bool {
        let is_reply = matches!(stanza.iq_type(), Some(IqType::Result | IqType::Error));
        if !is_reply || stanza.id() != Some(self.id.as_str()) {
            return false;
        }

        match &self.to {
            Some(expected) => stanza.from().as_ref() == Some(expected),
            None => true,
        }
    }
}
