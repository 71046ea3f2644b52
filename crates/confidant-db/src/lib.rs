pub mod migrations;
pub mod profile_store;
pub mod session_store;
pub mod vector_store;

pub use profile_store::{
    FactInsert, FeedbackEntry, MemoryFact, ProfileStore, UserProfile, fact_vector_id,
    normalize_fact,
};
pub use session_store::{SessionStore, SessionSummary};
pub use vector_store::{SqliteVectorIndex, VectorIndex, VectorMatch, VectorRecord};
