//! Notification fan-out, due reminders and recipient actions.

mod fanout;
mod inbox;
mod reminders;

pub use fanout::{recipients_for, FanoutReport, Mutation, NotificationFanout, RemovalCause};
pub use inbox::Inbox;
pub use reminders::{dedupe_key, default_due_window, ReminderSweep, SweepReport};
