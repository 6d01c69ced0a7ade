//! Data models for health records

mod chat;
mod document;
mod job;
mod lab_report;
mod medication;

pub use chat::*;
pub use document::*;
pub use job::*;
pub use lab_report::*;
pub use medication::*;
