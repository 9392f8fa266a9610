//! Chrome DevTools Protocol transport and page sessions.

mod client;
mod page;
mod protocol;

pub use client::CdpClient;
pub use page::CdpPage;
pub use protocol::{BrowserVersion, CdpRequest, CdpResponse};
