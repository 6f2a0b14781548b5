//! Persistent records.

pub mod account;
pub mod group;
pub mod permission;

pub use account::Account;
pub use group::Group;
pub use permission::Permission;
