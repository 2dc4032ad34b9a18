pub mod common;
pub mod lesson;
pub mod roster;
pub mod school;
pub mod subject;
pub mod teacher;
pub mod user_context;

pub use common::*;
pub use lesson::*;
pub use roster::*;
pub use school::*;
pub use subject::*;
pub use teacher::*;
pub use user_context::*;
