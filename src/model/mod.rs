pub mod clock;
pub mod record;
pub mod source;
pub mod time;

pub use clock::{Clock, ManualClock, SystemClock};
pub use record::*;
pub use source::{DataSource, Project};
