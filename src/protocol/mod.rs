//! Protocol-level values exchanged with the file-transfer subsystem.
//!
//! The byte encoding of these values belongs to the transport; the client
//! only relies on their meaning.

mod file_attrs;
mod open;
mod status;

pub use self::{
    file_attrs::{FileAttrFlags, FileType, RawAttributes},
    open::OpenFlags,
    status::{Status, StatusCode},
};
