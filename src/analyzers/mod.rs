//! The four signal-extraction analyzers (§4.2) behind one common trait.
//!
//! `ProfileAnalyzer` and `ContentAnalyzer` are pure and synchronous
//! internally, but implement the async trait anyway so the pipeline can
//! `tokio::join!` all four uniformly — matching `wg-bastion`'s
//! `GuardrailStage` trait, where synchronous detectors are still wrapped in
//! `#[async_trait]` for composability.

pub mod behavior;
pub mod content;
pub mod network;
pub mod profile;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::MessageContext;

pub use behavior::BehaviorAnalyzer;
pub use content::ContentAnalyzer;
pub use network::NetworkAnalyzer;
pub use profile::ProfileAnalyzer;

/// Common interface for all four analyzers. `Output` differs per analyzer
/// (`ProfileSignals`, `ContentSignals`, ...); the pipeline fans out over
/// four concrete types rather than a trait object, so this trait exists for
/// documentation/testing uniformity rather than dynamic dispatch.
#[async_trait]
pub trait Analyzer: Send + Sync {
    type Output;

    /// Analyzer name used in timeout/circuit-breaker error messages.
    fn name(&self) -> &'static str;

    async fn analyze(&self, context: &MessageContext) -> Result<Self::Output>;
}
