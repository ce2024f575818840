pub mod driver;
pub mod executor;
pub mod indicator_compute;
pub mod metrics;
pub mod returns;
pub mod sort_runtime;
pub mod validator;
pub mod warmup;
