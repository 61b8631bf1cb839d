//! Role guards shared by the attendance, marks, notes and parent routes.

pub mod helpers;

pub use helpers::{require_input, require_role, resolve_linked_student, verify_can_access_student};
