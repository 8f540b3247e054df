//! Reference processes, a process registry, and a configuration-driven
//! composer for the Vivarium simulation engine.
//!
//! Nothing here touches I/O. The engine binary loads configuration, asks
//! the [`ConfiguredComposer`] for composites, and hands them to a colony.
//!
//! # Modules
//!
//! - [`growth`] -- Exponential growth of one quantity ([`Growth`])
//! - [`divide_threshold`] -- Division flag raised above a threshold ([`DivideOnThreshold`])
//! - [`volume`] -- Volume deriver from mass and density ([`VolumeDeriver`])
//! - [`counter`] -- Fixed-amount decrement clamped at zero ([`CounterDecay`])
//! - [`transport`] -- Conserving uptake between two stores ([`Transport`])
//! - [`registry`] -- Type name → constructor ([`ProcessRegistry`])
//! - [`composer`] -- Composites from configuration ([`ConfiguredComposer`])
//! - [`parameters`] -- Typed parameter parsing
//! - [`error`] -- [`RegistryError`] and [`ComposerError`]

pub mod composer;
pub mod counter;
pub mod divide_threshold;
pub mod error;
pub mod growth;
pub mod parameters;
pub mod registry;
pub mod transport;
pub mod volume;

pub use composer::ConfiguredComposer;
pub use counter::CounterDecay;
pub use divide_threshold::DivideOnThreshold;
pub use error::{ComposerError, RegistryError};
pub use growth::Growth;
pub use registry::ProcessRegistry;
pub use transport::Transport;
pub use volume::VolumeDeriver;
