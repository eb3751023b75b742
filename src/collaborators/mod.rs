//! Services the core consumes but does not own: geometry splitting, the user
//! directory and the notification sink.

pub mod geometry;
pub mod notify;
pub mod users;

pub use geometry::{GeometryService, TileSplitter};
pub use notify::{MemorySink, NotificationSink, TracingSink};
pub use users::{StaticDirectory, UserDirectory};
