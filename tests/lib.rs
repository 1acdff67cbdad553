//! Integration tests exercising the full actor pipeline across real thread
//! and mailbox boundaries -- as opposed to the `#[cfg(test)]` modules beside
//! each component, which exercise a single struct's methods directly.
//!
//! These drive a spawned `Machine` or `Registry` actor with real `Message`s
//! on its mailbox, observing only what crosses back out to a test-owned
//! parent channel.

mod machine_pipeline;
mod registry_pipeline;
