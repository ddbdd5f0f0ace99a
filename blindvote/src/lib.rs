#[macro_use]
extern crate serde;

#[macro_use]
extern crate log;

mod arith;
mod authority;
mod ballot;
mod blind;
mod config;
mod credential;
mod election;
mod error;
mod identity;
mod operation;
mod registry;
mod serde_hex;
mod store;
mod tally;

pub use arith::*;
pub use authority::*;
pub use ballot::*;
pub use blind::*;
pub use config::*;
pub use credential::*;
pub use election::*;
pub use error::*;
pub use identity::*;
pub use operation::*;
pub use registry::*;
pub use serde_hex::*;
pub use store::*;
pub use tally::*;

pub use num_bigint_dig::BigUint;
