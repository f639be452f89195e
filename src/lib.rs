//! # saqshy-core
//!
//! Spam-detection decision core for chat moderation: signal extraction, risk
//! scoring, a trust/sandbox state machine, and a verdict-driven action
//! engine. The crate has no network or storage surface of its own — every
//! external dependency (message delivery, history lookup, subscription
//! checks, the spam database, an optional LLM adjudicator, decision
//! persistence, metrics) is injected through a trait in `protocols`, so the
//! whole pipeline runs against in-memory fakes in tests and against real
//! adapters in a host application.
//!
//! Entry point: [`pipeline::Pipeline`], built from a [`pipeline::PipelineDependencies`]
//! bundle and driven one [`types::MessageContext`] at a time via [`pipeline::Pipeline::run`].

pub mod action_engine;
pub mod analyzers;
pub mod audit;
pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod constants;
pub mod error;
pub mod pipeline;
pub mod protocols;
pub mod risk_calculator;
pub mod sandbox;
pub mod signals;
pub mod trust_manager;
pub mod types;

pub use error::{ErrorSeverity, Result, SaqshyError};
pub use pipeline::{Pipeline, PipelineDependencies, PipelineResult};
pub use types::{Decision, GroupType, MessageContext, ThreatType, TrustLevel, Verdict};
