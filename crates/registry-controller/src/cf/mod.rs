//! Control functions registered on every registry instance

mod env;
mod https;
mod labels;
mod log_level;
mod profile;

pub use env::EnvCf;
pub use https::{
    https_launch_options, HttpsCf, CERT_MOUNT_PATH, HTTPS_PORT, HTTP_PORT, TLS_CERT_KEY,
    TLS_KEY_KEY,
};
pub use labels::{LabelSource, LabelsCf};
pub use log_level::{LogLevelCf, LOG_LEVEL};
pub use profile::{ProfileCf, DEFAULT_PROFILE, QUARKUS_PROFILE};
