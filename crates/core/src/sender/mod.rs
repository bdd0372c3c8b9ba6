//! Tax-authority protocol client.
//!
//! Single documents are sent with `sendBill` and answered with a zipped
//! receipt (CDR). Batch documents are sent with `sendSummary`, answered with a
//! ticket, and decided later through `getStatus`. Every transport or protocol
//! problem is classified into an outcome; nothing is raised to the caller.

mod archive;
mod classify;
mod client;
mod soap;
mod types;

pub use archive::{first_xml_entry, pack};
pub use classify::{classify_code, CodeClass, ALREADY_REGISTERED};
pub use client::{endpoint, SunatSender};
pub use types::*;
