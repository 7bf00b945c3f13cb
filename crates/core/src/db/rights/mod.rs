//! The grantee/rights model: users, roles, grants with grant option and
//! the derived effective-rights maps.

mod grantee;
mod manager;
mod right;

pub use grantee::Grantee;
pub use manager::{GranteeManager, DBA_ROLE, PUBLIC_ROLE, SYSTEM_AUTHORIZATION};
pub use right::Right;
