//! agentest — agentic browser test execution with an action replay cache.
//!
//! A natural-language test is handed to a language model that drives a real
//! browser (and shell) through multi-turn tool calls until it emits a
//! pass/fail verdict. Every action of a passing run is recorded; a later run
//! of the byte-identical test replays the record instead of paying for the
//! model again.

pub mod agent;
pub mod cache;
pub mod config;
pub mod driver;
pub mod orchestrator;
pub mod providers;
pub mod tools;
