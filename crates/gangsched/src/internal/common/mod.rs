pub(crate) mod data_structures;
pub(crate) mod error;
pub(crate) mod ids;
#[macro_use]
pub mod index;
pub(crate) mod wrapped;

pub use data_structures::{Map, Set};
pub use wrapped::WrappedRcRefCell;
