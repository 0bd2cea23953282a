//! # framecut-core
//!
//! Core types for the FrameCut render backend.
//! This crate holds what every other crate agrees on: the planar `Picture`,
//! colors, the clip model and its descriptors, the plugin traits and
//! registry, the accelerator contract, configuration and error types.

pub mod accelerator;
pub mod clip;
pub mod color;
pub mod config;
pub mod effect;
pub mod error;
pub mod hash;
pub mod picture;
pub mod plugin;
pub mod source;

pub use accelerator::{Accelerator, AcceleratorKind, ExecutionMode, Operand};
pub use clip::{Clip, ClipBehavior, ClipHeader, ClipKind, EffectDescriptor, MixtureDescriptor, MixtureMode};
pub use color::Color;
pub use config::{BackendConfig, ConfigError, OutputSize, ServiceSettings};
pub use effect::{Computer, Effect, Mixture};
pub use error::{FrameCutError, FrameCutResult};
pub use picture::{BitDepth, Channel, Picture};
pub use plugin::{Plugin, PluginEntries, PluginManifest, PluginRegistry};
pub use source::{AudioSource, SoundTrack, VideoSource};
