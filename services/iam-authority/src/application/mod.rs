//! 应用层

pub mod resolver;
pub mod service;
pub mod synthesizer;

pub use resolver::{load_catalog, AuthorityResolver, ResolvedOperation, ResolvedOperationSet};
pub use service::{AuthorityService, AuthorityStores};
pub use synthesizer::{PolicySynthesizer, SynthesisReport, SynthesisStage};
