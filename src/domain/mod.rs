pub mod model;
pub mod query;
pub mod unique_id;
pub mod version_tag;
pub mod wire;

pub use model::{Asset, AssetType, Extension, Property, Version};
pub use unique_id::UniqueId;
pub use version_tag::{VersionTag, UNIVERSAL_PLATFORM};
