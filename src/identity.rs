//! Identity-domain identifiers, credentials, and user-defined groupings.

pub mod credential;
pub mod group;
pub mod id;

pub use credential::*;
pub use group::*;
pub use id::*;
