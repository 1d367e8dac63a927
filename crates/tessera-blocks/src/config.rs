use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;

use crate::class::MaterialClass;

#[derive(Deserialize, Clone, Debug, Default)]
pub struct BlocksConfig {
    #[serde(default)]
    pub blocks: Vec<BlockDef>,
    /// Block used for ids the registry does not define.
    pub unknown_block: Option<String>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct BlockDef {
    pub name: String,
    pub id: Option<u16>,
    #[serde(default)]
    pub class: MaterialClass,
    pub materials: Option<MaterialsDef>,
    /// property name -> allowed values; packed into `Block::state` bits.
    pub state_schema: Option<BTreeMap<String, Vec<String>>>,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(untagged)]
pub enum MaterialsDef {
    // materials = "stone"
    All(String),
    // materials = { top = "grass_top", side = "grass_side", bottom = "dirt" }
    Faces {
        all: Option<MaterialSelector>,
        top: Option<MaterialSelector>,
        bottom: Option<MaterialSelector>,
        side: Option<MaterialSelector>,
    },
}

#[derive(Deserialize, Clone, Debug)]
#[serde(untagged)]
pub enum MaterialSelector {
    Key(String),
    // { by = "color", map = { red = "wool_red", blue = "wool_blue" } }
    By {
        by: String,
        map: HashMap<String, String>,
    },
}
