pub mod allocator;
pub mod error;
pub mod session;

pub use allocator::PartialOrderAllocator;
pub use error::{AllocationError, NotReady, UnmetCondition};
pub use session::{AllocationSession, PartialOrder, RoundTicket, Selection, SessionState};
