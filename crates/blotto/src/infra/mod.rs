pub mod db;
pub mod lightning;
pub mod lightning_mock;
pub mod lnurl;
pub mod notifier;
