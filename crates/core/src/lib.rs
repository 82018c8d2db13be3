//! `outbox-core` — domain building blocks of the transactional outbox.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! the outgoing `Message`, the persisted `Record` and its delivery state
//! machine, the `RetrialPolicy`, and the injectable `Clock` / `IdGenerator`
//! providers.

pub mod clock;
pub mod error;
pub mod id;
pub mod message;
pub mod policy;
pub mod record;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{RecordError, RecordResult};
pub use id::{IdGenerator, RecordId, SequentialIdGenerator, UuidV7Generator};
pub use message::{Header, Message};
pub use policy::RetrialPolicy;
pub use record::{Claim, Record, RecordState};
