//! CLI command handlers, one per file.

mod cancel;
mod fetch;
mod finish_early;
mod serve;
mod status;
mod watch;

pub use cancel::run_cancel;
pub use fetch::run_fetch;
pub use finish_early::run_finish_early;
pub use serve::run_serve;
pub use status::run_status;
pub use watch::run_watch;

use yoink_core::progress::ProgressEvent;

/// One progress line for the terminal.
pub(crate) fn print_event(event: &ProgressEvent) {
    match event.progress {
        Some(pct) => println!("[{:>3}%] {:<16} {}", pct, event.stage, event.message),
        None => println!("[   ] {:<16} {}", event.stage, event.message),
    }
}
