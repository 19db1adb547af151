//! `lazydev-client`: Status API client, countdown reconciler and polling loops.
//!
//! The server is only ever pulled: [`watch::JobWatcher`] fetches a job every
//! few seconds while it is live and re-renders the countdown locally in
//! between, from the last snapshot only.

pub mod api;
pub mod error;
pub mod reconciler;
pub mod watch;

pub use api::{ApiClient, CancelResponse, Credential, JobSource, Session, SubmitResponse};
pub use error::{ClientError, Result};
pub use reconciler::{reconcile, Countdown};
pub use watch::{JobListWatcher, JobView, JobWatcher, ListView};
