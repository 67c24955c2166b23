pub mod api;
pub mod automation;
pub mod browser;
pub mod config;
pub mod coordinator;
pub mod dom_extractor;
pub mod error;
pub mod interceptor;
pub mod messages;
pub mod parser;
pub mod pdf;
pub mod processor;
pub mod profile;
pub mod queue;
pub mod recruiting_api;
pub mod relay;
pub mod settings;
pub mod sourcing;
pub mod worker;
