//! External collaborator traits and in-memory implementations for saga steps.

pub mod catalog;
pub mod player;
pub mod publisher;
pub mod wallet;

pub use catalog::{GameCatalog, InMemoryGameCatalog};
pub use player::{InMemoryPlayerService, PlayerService};
pub use publisher::{EventPublisher, InMemoryEventPublisher};
pub use wallet::{InMemoryWalletService, WalletOperation, WalletService, WalletTransaction};
