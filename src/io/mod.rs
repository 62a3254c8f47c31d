//! Helpers on the raster-engine boundary

pub mod scene_id;

pub use scene_id::SceneId;
