//! Scaffolding shared by the unit and integration tests: fresh migrated databases and an
//! in-memory chain feed.
pub mod mock_chain;
pub mod prepare_env;
