pub mod entity;
pub mod response;

pub use entity::*;
pub use response::*;
