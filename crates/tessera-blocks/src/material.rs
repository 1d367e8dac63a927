use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::RegistryError;
use crate::types::MaterialId;

#[derive(Clone, Debug)]
pub struct Material {
    pub id: MaterialId,
    pub key: String,
    pub color: [u8; 4],
    pub render_tag: Option<String>,
}

#[derive(Clone, Debug)]
pub struct MaterialCatalog {
    pub materials: Vec<Material>,
    pub by_key: HashMap<String, MaterialId>,
}

impl Default for MaterialCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl MaterialCatalog {
    /// Empty catalog holding only the reserved `MaterialId::NONE` slot.
    pub fn new() -> Self {
        Self {
            materials: vec![Material {
                id: MaterialId::NONE,
                key: String::new(),
                color: [0, 0, 0, 0],
                render_tag: None,
            }],
            by_key: HashMap::new(),
        }
    }

    pub fn get_id(&self, key: &str) -> Option<MaterialId> {
        self.by_key.get(key).copied()
    }

    pub fn get(&self, id: MaterialId) -> Option<&Material> {
        self.materials.get(id.0 as usize)
    }

    /// RGBA color for a material; magenta for ids the catalog does not know.
    pub fn color(&self, id: MaterialId) -> [u8; 4] {
        self.get(id).map(|m| m.color).unwrap_or([255, 0, 255, 255])
    }

    pub fn len(&self) -> usize {
        self.materials.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn insert(&mut self, key: &str, color: [u8; 4], render_tag: Option<String>) -> MaterialId {
        if let Some(id) = self.get_id(key) {
            return id;
        }
        let id = MaterialId(self.materials.len() as u16);
        self.by_key.insert(key.to_string(), id);
        self.materials.push(Material {
            id,
            key: key.to_string(),
            color,
            render_tag,
        });
        id
    }

    pub fn from_toml_str(toml_str: &str) -> Result<Self, RegistryError> {
        let cfg: MaterialsConfig = toml::from_str(toml_str)?;
        let mut catalog = MaterialCatalog::new();
        let mut entries: Vec<(String, MaterialEntry)> = cfg.materials.into_iter().collect();
        // HashMap iteration order is nondeterministic; sort keys so MaterialId assignment is stable.
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        for (key, entry) in entries {
            let (channels, render_tag) = match entry {
                MaterialEntry::Color(v) => (v, None),
                MaterialEntry::Detail { color, render_tag } => (color, render_tag),
            };
            let color = match channels.as_slice() {
                [r, g, b] => [*r, *g, *b, 255],
                [r, g, b, a] => [*r, *g, *b, *a],
                other => {
                    return Err(RegistryError::BadColor {
                        key,
                        len: other.len(),
                    });
                }
            };
            catalog.insert(&key, color, render_tag);
        }
        Ok(catalog)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let s = fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&s)
    }
}

// --- Config ---

#[derive(Deserialize)]
pub struct MaterialsConfig {
    pub materials: HashMap<String, MaterialEntry>,
}

#[derive(Deserialize)]
#[serde(untagged)]
pub enum MaterialEntry {
    // Simple: stone = [125, 125, 125]
    Color(Vec<u8>),
    // Detailed: water = { color = [50, 90, 200, 160], render_tag = "water" }
    Detail {
        color: Vec<u8>,
        render_tag: Option<String>,
    },
}
