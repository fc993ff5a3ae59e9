pub mod input;
pub mod orchestrator;
pub mod output;
pub mod patterns;
pub mod prompt;
pub mod retrieval;
