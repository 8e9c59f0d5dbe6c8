pub mod backoff;
pub mod batch;
pub mod citations;
pub mod config;
pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod interpret;
pub mod progress;
pub mod prompt;
pub mod reasoning;
pub mod report;
pub mod response;
pub mod worker;
