//! Default content-fetch backend: asks HTTP path gateways in configured
//! order and sniffs a content type when the gateway sends none.

mod gateway;
mod probe;
mod sniff;

pub use gateway::{GatewayFactory, GatewayFetch, split_locator};
pub use probe::HttpProbe;
pub use sniff::MimeSniffer;
