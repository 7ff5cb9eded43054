//! Profile row stores (Firestore and in-memory).

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreProfileStore;
pub use memory::MemoryBackend;

/// Firestore collection names as constants.
pub mod collections {
    /// User profiles written by the Firebase-era storefront (keyed by uid)
    pub const USERS: &str = "users";
}

/// Postgres table names as constants.
pub mod tables {
    /// User profiles, inserted by a trigger on auth sign-up (keyed by uid)
    pub const PROFILES: &str = "profiles";
}
