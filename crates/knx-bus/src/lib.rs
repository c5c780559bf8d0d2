//! # knx-bus
//!
//! Minimal KNX client for writing group values from a gateway process.
//!
//! ## Modules
//!
//! - [`address`] — group (`1/2/3`) and individual (`1.1.250`) addresses
//! - [`dpt`] — datapoint types and value encoding
//! - [`frame`] — cEMI and KNXnet/IP frame building and parsing
//! - [`transport`] — blocking routing and tunnelling client
//! - [`error`] — Error types

pub mod address;
pub mod dpt;
pub mod error;
pub mod frame;
pub mod transport;

pub use address::{GroupAddress, IndividualAddress};
pub use dpt::{DatapointType, DptValue, Payload};
pub use error::KnxError;
pub use transport::{ConnectionConfig, ConnectionType, KnxClient};
