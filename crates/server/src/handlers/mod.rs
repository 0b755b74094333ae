//! HTTP request handlers.

pub mod admission;
pub mod bulk;
pub mod health;
pub mod images;

pub use admission::*;
pub use bulk::*;
pub use health::*;
pub use images::*;
