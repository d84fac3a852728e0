mod battles;
mod bets;
mod events;
mod invoice;
mod lightning;
mod lottery;
mod prizes;
mod winners;
mod withdraw;

pub use battles::{create_battle, get_battles, join_battle};
pub use bets::get_bets;
pub use events::get_events;
pub use invoice::get_invoice;
pub use lightning::{get_lightning_address, lnurl_withdraw, set_lightning_address};
pub use lottery::{get_heights, get_lottery};
pub use prizes::get_prizes;
pub use winners::get_winners;
pub use withdraw::withdraw;
