//! Email delivery for Batchmail.
//!
//! Template rendering, the delivery providers and the batch dispatcher that
//! the scheduler runs for every campaign batch.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

pub mod dispatch;
pub mod provider;
pub mod task;
pub mod template;

mod prelude;

use crate::prelude::*;

pub use dispatch::{DispatchOutcome, DispatchSummary, Dispatcher};
pub use provider::{SendGridProvider, SmtpConfig, SmtpProvider, SmtpTls};
pub use task::BatchDispatchTask;
pub use template::{Template, render};

/// Register the email tasks with the scheduler
pub fn init(app: &App) -> ClResult<()> {
	app.scheduler.register::<BatchDispatchTask>()?;
	Ok(())
}

// vim: ts=4
