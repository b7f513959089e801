//! Shared payloads and signatures for the coinvault custody core.
//!
//! Downstream consumers use the [`objects`] types to decode deposit events,
//! and the custody core uses [`client::PartnerClient`] (behind the `client`
//! feature) to report broadcast withdrawals to a partner exchange.

#[cfg(feature = "client")]
pub mod client;
pub mod objects;
pub mod signature;
