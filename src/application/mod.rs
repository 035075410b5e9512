pub mod detector;
pub mod fetcher;
pub mod monitoring;
pub mod orchestrator;
pub mod reporter;
pub mod verifier;
