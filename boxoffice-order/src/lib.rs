pub mod changes;
pub mod coordinator;
pub mod fulfillment;
pub mod gateways;
pub mod inventory;
pub mod models;
pub mod notifier;
pub mod registry;
pub mod seatsio;
pub mod sweeper;

pub use coordinator::{CoordinatorSettings, ReservationCoordinator};
pub use inventory::InMemorySeatInventory;
pub use notifier::{BroadcastNotifier, ReservationNotifier};
pub use registry::PaymentGatewayRegistry;
pub use seatsio::SeatsIoClient;
pub use sweeper::{ExpiryNoticeSweeper, HoldExpirySweeper, SweeperSettings};
