pub mod record;

pub use record::{ClientContext, ShareOutcome, ShareRecord, ShareRequest};
