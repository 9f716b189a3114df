// Draft day: pick log entries, progress values, and the session controller.

pub mod pick;
pub mod progress;
pub mod session;
