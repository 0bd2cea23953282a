//! # framecut-render
//!
//! The FrameCut rendering engine. Turns the active clip set into composited
//! still frames: kernels and accelerators, the built-in plugin (clips,
//! effects, mixtures, video decoding) and the timeline compositor.
//! GPU kernels are behind the `gpu` feature.

pub mod accel;
pub mod builtin;
pub mod clips;
pub mod computers;
pub mod effects;
#[cfg(feature = "gpu")]
pub mod gpu;
pub mod image_loader;
pub mod kernels;
pub mod mixtures;
pub mod text;
pub mod timeline;
pub mod video_decoder;

pub use accel::{create_accelerator, CpuAccelerator};
pub use builtin::InternalPlugin;
pub use timeline::{collect_frames, composite, select_active_clips, Compositor, OneFrame};
