//! Security module - upload validation and URL signing

pub mod signing;
pub mod validator;

pub use signing::*;
pub use validator::*;
