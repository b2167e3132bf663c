#[macro_use]
extern crate serde;

mod api;
mod authority;
mod config;
mod election;
mod error;
mod ledger;
mod relay;
mod store;
mod tally;
mod util;
mod vote;

pub use api::*;
pub use authority::*;
pub use config::*;
pub use election::*;
pub use error::*;
pub use ledger::*;
pub use relay::*;
pub use store::*;
pub use tally::*;
pub use util::*;
pub use vote::*;

pub type Hash = [u8; 32];
