//! Block, material class and registry crate.
#![forbid(unsafe_code)]

pub mod class;
pub mod config;
pub mod error;
pub mod material;
pub mod registry;
pub mod types;

pub use class::{MaterialClass, MaterialRules, RULES, face_visible};
pub use error::RegistryError;
pub use material::MaterialCatalog;
pub use registry::{BlockRegistry, BlockType};
pub use types::{Block, BlockId, BlockState, FaceRole, MaterialId};
