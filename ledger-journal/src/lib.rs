#![deny(clippy::print_stdout, clippy::print_stderr)]

//! The journal writer, fiscal period lifecycle, and sequence allocator
//! (spec §4.5–§4.6): the only component permitted to append rows to the
//! posted ledger, and the one that makes immutability and balance
//! invariants structurally hard to violate.

pub mod period;
pub mod sequence;
pub mod types;
pub mod writer;

pub use period::FiscalPeriod;
pub use period::InMemoryPeriodService;
pub use period::PeriodError;
pub use period::PeriodResult;
pub use period::PeriodService;
pub use period::PeriodState;
pub use sequence::SequenceAllocator;
pub use types::EntryStatus;
pub use types::JournalEntry;
pub use types::JournalLine;
pub use types::ReferenceSnapshot;
pub use types::RoleBinding;
pub use writer::InMemoryRoleBindingResolver;
pub use writer::JournalError;
pub use writer::JournalResult;
pub use writer::JournalWriter;
pub use writer::PostRequest;
pub use writer::RoleBindingResolver;
pub use writer::SubledgerControl;
pub use writer::SubledgerRecorder;
