//! Authorization: caller identity, visibility scoping and the project quota.
//!
//! - `SUPER_ADMIN` short-circuits every decision before any store read
//! - project edit rights come from a membership role of at least
//!   `PROJECT_OWNER`, or from owning the project
//! - group visibility follows the membership scope (`ALL` or an explicit
//!   group allowlist)

mod principal;
mod quota;
mod scoping;

pub use principal::{GlobalRole, Principal};
pub use quota::{QuotaEnforcer, PROJECT_QUOTA};
pub use scoping::{GroupVisibility, ScopingEngine, EDIT_ROLE};
