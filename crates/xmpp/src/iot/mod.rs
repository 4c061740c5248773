//! XEP-0323 sensor data: requesting momentary read-outs from things and
//! answering such requests for locally installed things.

pub mod data_manager;
pub mod element;
pub mod filter;
pub mod read_out;
pub mod thing;

pub use data_manager::IotDataManager;
pub use element::{
    DataField, DataRequest, FieldValue, FieldsExtension, NAMESPACE, NodeElement, NodeInfo,
    ReadOutAccepted, TimestampElement,
};
pub use filter::FieldsFilter;
pub use read_out::ReadOutSession;
pub use thing::{MomentaryReadOut, ReadOutError, Thing, ThingRegistry, read_out_fn};
