//! Concrete [`TaskHost`](crate::tasks::TaskHost) implementations. The core
//! never reaches these directly; it only sees the trait.

mod local;

pub use local::LocalHost;
