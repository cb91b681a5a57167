pub mod post;
pub mod user;
pub mod vote;

pub use post::*;
pub use user::*;
pub use vote::*;
