pub mod utils;

mod test_executor;
mod test_recovery;
