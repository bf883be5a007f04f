//! Service layer between the HTTP handlers and the database/store
//!
//! Services own the rules (which status transitions are allowed, which
//! media types a slot takes, when pruning is due) so handlers only deal
//! with request and response shapes.

pub mod media;
pub mod songs;
pub mod uploads;

pub use media::MediaService;
pub use songs::{SongPatch, SongService};
pub use uploads::{UploadFileInfo, UploadService};
