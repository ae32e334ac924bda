//! Shared types for the TD indexer.
//!
//! The data model lives here so that the chain gateway, the catalog, the offer
//! store and the HTTP layer agree on one representation of requests, Thing
//! Descriptions and offers.

pub mod api;
pub mod delivery;
pub mod events;
pub mod offer;
pub mod request;
pub mod td;

pub use api::*;
pub use delivery::*;
pub use events::*;
pub use offer::*;
pub use request::*;
pub use td::*;
