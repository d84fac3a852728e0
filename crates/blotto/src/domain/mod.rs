pub mod battles;
pub mod lottery;
pub mod stores;
pub mod streamer;
pub mod tracker;

pub use battles::{BattleError, Battles, CreatedBattle};
pub use lottery::Lottery;
pub use stores::{Bet, StoreError, Stores, Winner};
pub use streamer::EventStreamer;
pub use tracker::PaymentTracker;
