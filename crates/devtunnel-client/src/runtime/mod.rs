pub mod admission;
pub mod router;

pub use admission::{Admission, AdmissionPolicy, KeyedLocks, GLOBAL_LOCK_KEY};
pub use router::InvocationRouter;
