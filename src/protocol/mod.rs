//! Wire entities for the exchange stream: CRLF-terminated JSON objects tagged by `op`.

pub mod inbound;
pub mod market;
pub mod order;
pub mod request;

pub use inbound::*;
pub use market::*;
pub use order::*;
pub use request::*;
