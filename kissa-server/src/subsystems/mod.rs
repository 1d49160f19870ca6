pub mod archive;
pub mod backends;
pub mod export;
pub mod ledger;
