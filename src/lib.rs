pub mod chain;
pub mod config;
pub mod domain;
pub mod engine;
pub mod events;
pub mod monitoring;
pub mod notifier;
pub mod oracle;
pub mod retry;
pub mod rpc;
pub mod scheduler;
pub mod strategy;
pub mod time;
pub mod venue;
