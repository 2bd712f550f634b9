//! Platform pipeline definitions for the four shipped advertising
//! platforms, plus the fixture adapter and the registry that assembles
//! runnable pipelines.
//!
//! Real HTTP/SDK adapters are external collaborators: anything implementing
//! [`adsync_engine::pipeline::PlatformAdapter`] plugs into the registry.

pub mod fixture;
pub mod registry;
pub mod specs;

pub use fixture::{frame_from_json, FixtureAdapter};
pub use registry::PlatformRegistry;
pub use specs::{facebook, google, linkedin, microsoft, platform_names, spec_for};
