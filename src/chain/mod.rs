//! Chain access
//!
//! - `facade`: the query capability derivations are written against
//! - `primitives`: account, balance and hash types decoded from storage
//! - `sandbox`: in-memory chain serving the facade
//! - `state_loader`: hydrates the sandbox from JSON/JSONL exports

pub mod facade;
pub mod primitives;
pub mod sandbox;
pub mod state_loader;

pub use facade::{api_id, ChainApi, ChainError, QueryStream, StoragePath, StorageValue};
pub use primitives::{AccountId, Balance, BlockNumber, Hash};
pub use sandbox::{ChainStats, SandboxChain};
