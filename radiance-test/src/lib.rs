mod helpers;
mod runner;

pub use tokio::test as test_attr;

pub use helpers::{cube, NoImages};
pub use runner::{TestRunner, TestRunnerBuilder};

/// Returns from the enclosing test when no adapter is available.
#[macro_export]
macro_rules! no_gpu_return {
    ($value:expr) => {
        match $value {
            Ok(value) => value,
            Err(e) => {
                eprintln!("Skipping test, no usable GPU: {e:#}");
                return Ok(());
            }
        }
    };
}
