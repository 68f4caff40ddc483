pub mod address;
pub mod dns;

pub use address::{Address, AddressError};
pub use dns::{DnsMessage, DnsMessageError, QueryType};
