pub mod collector;
pub mod config;
pub mod connection;
pub mod error;
pub mod filter;
pub mod iot;
pub mod iq_request;
pub mod manager;
pub mod sequence;
pub mod stanza;
pub mod transport;

pub use collector::{Collector, CollectorConfig, CollectorRegistry};
pub use config::{ConfigError, XmppConfig};
pub use connection::{ConnectionId, XmppConnection};
pub use error::{
    CollectorError, ConnectionError, ExchangeError, RequestHandlerError, StanzaCodecError,
    StanzaErrorCondition, StanzaErrorType,
};
pub use filter::{
    AcceptAll, AndFilter, FromFilter, IqReplyFilter, MessageTypeFilter, NotFilter, OrFilter,
    StanzaFilter, StanzaFilterExt, StanzaKindFilter, filter_fn,
};
pub use iq_request::{Dispatch, HandlerMode, IqHandlerOutcome, IqRequestHandler};
pub use manager::{Manager, ManagerRegistry};
pub use sequence::SequenceAllocator;
pub use stanza::{IqType, MessageType, Stanza, StanzaKind};
pub use transport::{ChannelTransport, StanzaTransport};
