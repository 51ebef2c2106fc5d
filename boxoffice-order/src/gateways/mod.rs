pub mod amwal;
pub mod cash;
pub mod mock;

pub use amwal::{AmwalGateway, AmwalSettings};
pub use cash::CashGateway;
pub use mock::MockGateway;
