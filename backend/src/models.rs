pub mod attendance;
pub mod marks;
pub mod note;
pub mod role;
