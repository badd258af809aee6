pub mod app;
pub mod cli;
pub mod config;
pub mod display;
pub mod error;
pub mod exec;
pub mod kubeconfig;
pub mod logging;
pub mod paths;
pub mod protection;
pub mod shell;
pub mod state;
#[cfg(test)]
pub mod test_support;
pub mod vault;
