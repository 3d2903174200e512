//! In-memory persistence provider.
//!
//! The reference implementation of the storage contract. Nothing survives a
//! restart; use it for tests, single-process embedding, and as the behavioral
//! baseline other stores are checked against.

pub mod provider;

pub use provider::MemoryPersistenceProvider;
