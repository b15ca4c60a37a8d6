mod attachment;
mod board;
mod comment;
mod post;
mod reaction;
mod subscription;
mod user;

pub use attachment::*;
pub use board::*;
pub use comment::*;
pub use post::*;
pub use reaction::*;
pub use subscription::*;
pub use user::*;
