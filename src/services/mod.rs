pub mod catalog;
pub mod copy;
pub mod dispatcher;
pub mod distance;
pub mod ledger;
pub mod orders;
pub mod quoting;
pub mod sessions;
