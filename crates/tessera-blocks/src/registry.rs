use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use crate::class::{MaterialClass, face_visible};
use crate::config::{BlocksConfig, MaterialSelector, MaterialsDef};
use crate::error::RegistryError;
use crate::material::MaterialCatalog;
use crate::types::{Block, BlockId, BlockState, FaceRole, MaterialId};

const UNKNOWN_MATERIAL: &str = "unknown";
const UNKNOWN_COLOR: [u8; 4] = [255, 0, 255, 255];
// States beyond this many bits resolve materials without the per-state cache.
const MAX_CACHED_STATE_BITS: u32 = 8;

#[derive(Default, Clone, Debug)]
pub struct CompiledMaterials {
    pub all: Option<ResolvedSelector>,
    pub top: Option<ResolvedSelector>,
    pub bottom: Option<ResolvedSelector>,
    pub side: Option<ResolvedSelector>,
}

#[derive(Clone, Debug)]
pub enum ResolvedSelector {
    Fixed(MaterialId),
    By {
        by: String,
        map: HashMap<String, MaterialId>,
    },
}

impl CompiledMaterials {
    fn fixed(top: MaterialId, side: MaterialId, bottom: MaterialId) -> Self {
        Self {
            all: None,
            top: Some(ResolvedSelector::Fixed(top)),
            bottom: Some(ResolvedSelector::Fixed(bottom)),
            side: Some(ResolvedSelector::Fixed(side)),
        }
    }

    fn material_for(&self, role: FaceRole, state: BlockState, ty: &BlockType) -> Option<MaterialId> {
        let pick = match role {
            FaceRole::Top => self.top.as_ref().or(self.all.as_ref()),
            FaceRole::Bottom => self.bottom.as_ref().or(self.all.as_ref()),
            FaceRole::Side => self.side.as_ref().or(self.all.as_ref()),
        }?;
        match pick {
            ResolvedSelector::Fixed(id) => Some(*id),
            ResolvedSelector::By { by, map } => {
                let val = ty.state_prop_value(state, by)?;
                map.get(val).copied()
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct StateField {
    pub name: String,
    pub values: Vec<String>,
    pub bits: u32,
    pub offset: u32,
}

#[derive(Clone, Debug)]
pub struct BlockType {
    pub id: BlockId,
    pub name: String,
    pub class: MaterialClass,
    pub materials: CompiledMaterials,
    pub state_fields: Vec<StateField>,
    pub prop_index: HashMap<String, usize>,
    // role -> material per state, indexed [top, bottom, side]
    pre_mat: [Vec<MaterialId>; 3],
    fallback_material: MaterialId,
}

impl BlockType {
    fn new(
        id: BlockId,
        name: String,
        class: MaterialClass,
        materials: CompiledMaterials,
        schema: &BTreeMap<String, Vec<String>>,
        fallback_material: MaterialId,
    ) -> Self {
        let (state_fields, prop_index) = compute_state_layout(schema);
        let mut ty = BlockType {
            id,
            name,
            class,
            materials,
            state_fields,
            prop_index,
            pre_mat: [Vec::new(), Vec::new(), Vec::new()],
            fallback_material,
        };
        let total_bits: u32 = ty.state_fields.iter().map(|f| f.bits).sum();
        if total_bits <= MAX_CACHED_STATE_BITS {
            let states_len = 1usize << total_bits;
            for (slot, role) in [FaceRole::Top, FaceRole::Bottom, FaceRole::Side]
                .into_iter()
                .enumerate()
            {
                let v: Vec<MaterialId> = (0..states_len)
                    .map(|s| ty.resolve_material(role, s as BlockState))
                    .collect();
                ty.pre_mat[slot] = v;
            }
        }
        ty
    }

    fn resolve_material(&self, role: FaceRole, state: BlockState) -> MaterialId {
        self.materials
            .material_for(role, state, self)
            .unwrap_or(self.fallback_material)
    }

    #[inline]
    pub fn material_for(&self, role: FaceRole, state: BlockState) -> MaterialId {
        let slot = match role {
            FaceRole::Top => 0,
            FaceRole::Bottom => 1,
            FaceRole::Side => 2,
        };
        match self.pre_mat[slot].get(state as usize) {
            Some(id) => *id,
            None => self.resolve_material(role, state),
        }
    }

    pub fn state_prop_value<'a>(&'a self, state: BlockState, prop: &str) -> Option<&'a str> {
        let &i = self.prop_index.get(prop)?;
        let f = &self.state_fields[i];
        if f.bits == 0 {
            return f.values.first().map(|s| s.as_str());
        }
        let mask: u32 = (1u32 << f.bits) - 1;
        let idx: usize = (((state as u32) >> f.offset) & mask) as usize;
        f.values.get(idx).map(|s| s.as_str())
    }

    pub fn pack_state(&self, props: &HashMap<String, String>) -> BlockState {
        let mut acc: u32 = 0;
        for f in &self.state_fields {
            if f.bits == 0 {
                continue;
            }
            let sel_idx: u32 = match props.get(&f.name) {
                Some(val) => f.values.iter().position(|s| s == val).unwrap_or(0) as u32,
                None => 0,
            };
            acc |= (sel_idx & ((1u32 << f.bits) - 1)) << f.offset;
        }
        acc as BlockState
    }
}

fn compute_state_layout(
    schema: &BTreeMap<String, Vec<String>>,
) -> (Vec<StateField>, HashMap<String, usize>) {
    let mut offset: u32 = 0;
    let mut fields: Vec<StateField> = Vec::with_capacity(schema.len());
    for (k, vals) in schema {
        let vlen = vals.len() as u32;
        let bits: u32 = if vlen <= 1 {
            0
        } else {
            32 - (vlen - 1).leading_zeros()
        };
        fields.push(StateField {
            name: k.clone(),
            values: vals.clone(),
            bits,
            offset,
        });
        offset = offset.saturating_add(bits);
    }
    let index: HashMap<String, usize> = fields
        .iter()
        .enumerate()
        .map(|(i, f)| (f.name.clone(), i))
        .collect();
    (fields, index)
}

/// Block types by id plus the material catalog they draw from. Ids with no
/// definition resolve to the unknown block, which renders as an opaque cube.
#[derive(Clone, Debug)]
pub struct BlockRegistry {
    pub materials: MaterialCatalog,
    blocks: Vec<Option<BlockType>>,
    by_name: HashMap<String, BlockId>,
    unknown: BlockType,
}

impl BlockRegistry {
    #[inline]
    pub fn get(&self, id: BlockId) -> Option<&BlockType> {
        self.blocks.get(id as usize).and_then(|t| t.as_ref())
    }

    /// Type for `id`, falling back to the unknown block.
    #[inline]
    pub fn block_type(&self, id: BlockId) -> &BlockType {
        self.get(id).unwrap_or(&self.unknown)
    }

    pub fn id_by_name(&self, name: &str) -> Option<BlockId> {
        self.by_name.get(name).copied()
    }

    pub fn block(&self, name: &str) -> Option<Block> {
        self.id_by_name(name).map(Block::new)
    }

    pub fn make_block_by_name(&self, name: &str, props: &HashMap<String, String>) -> Option<Block> {
        let id = self.id_by_name(name)?;
        let state = self.get(id).map(|ty| ty.pack_state(props)).unwrap_or(0);
        Some(Block { id, state })
    }

    pub fn unknown_block_id(&self) -> BlockId {
        self.unknown.id
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    #[inline]
    pub fn class_of(&self, block: Block) -> MaterialClass {
        if block.is_air() {
            return MaterialClass::Air;
        }
        self.block_type(block.id).class
    }

    #[inline]
    pub fn material_for(&self, block: Block, role: FaceRole) -> MaterialId {
        self.block_type(block.id).material_for(role, block.state)
    }

    /// Culling rule for the face of `own` that touches `other`.
    #[inline]
    pub fn face_visible(&self, own: Block, other: Block) -> bool {
        face_visible(self.class_of(own), self.class_of(other), own.id == other.id)
    }

    pub fn load_from_paths(
        materials_path: impl AsRef<Path>,
        blocks_path: impl AsRef<Path>,
    ) -> Result<Self, RegistryError> {
        let materials = MaterialCatalog::from_path(materials_path)?;
        let blocks_path = blocks_path.as_ref();
        let blocks_toml = fs::read_to_string(blocks_path).map_err(|source| RegistryError::Io {
            path: blocks_path.display().to_string(),
            source,
        })?;
        let blocks_cfg: BlocksConfig = toml::from_str(&blocks_toml)?;
        Self::from_configs(materials, blocks_cfg)
    }

    pub fn from_toml_strs(materials_toml: &str, blocks_toml: &str) -> Result<Self, RegistryError> {
        let materials = MaterialCatalog::from_toml_str(materials_toml)?;
        let cfg: BlocksConfig = toml::from_str(blocks_toml)?;
        Self::from_configs(materials, cfg)
    }

    pub fn from_configs(
        mut materials: MaterialCatalog,
        cfg: BlocksConfig,
    ) -> Result<Self, RegistryError> {
        let unknown_mid = materials.insert(UNKNOWN_MATERIAL, UNKNOWN_COLOR, None);
        let mut blocks: Vec<Option<BlockType>> = vec![Some(air_type())];
        let mut next_id: u16 = 1;
        for def in cfg.blocks {
            if def.name == "air" {
                continue;
            }
            let id = match def.id {
                Some(0) => return Err(RegistryError::ReservedAirId(def.name)),
                Some(id) => id,
                None => next_id,
            };
            next_id = next_id.max(id.saturating_add(1));
            if let Some(Some(prev)) = blocks.get(id as usize) {
                return Err(RegistryError::DuplicateId {
                    id,
                    first: prev.name.clone(),
                    second: def.name,
                });
            }
            let compiled = compile_materials(&materials, &def.name, def.materials)?;
            let schema = def.state_schema.unwrap_or_default();
            let ty = BlockType::new(id, def.name, def.class, compiled, &schema, unknown_mid);
            if blocks.len() <= id as usize {
                blocks.resize(id as usize + 1, None);
            }
            blocks[id as usize] = Some(ty);
        }

        let by_name: HashMap<String, BlockId> = blocks
            .iter()
            .flatten()
            .map(|t| (t.name.clone(), t.id))
            .collect();
        let unknown = cfg
            .unknown_block
            .as_deref()
            .and_then(|n| by_name.get(n))
            .and_then(|id| blocks[*id as usize].clone())
            .unwrap_or_else(|| unknown_type(u16::MAX, unknown_mid));
        Ok(BlockRegistry {
            materials,
            blocks,
            by_name,
            unknown,
        })
    }

    /// Small built-in palette used when no block definitions are configured.
    pub fn builtin() -> Self {
        let mut materials = MaterialCatalog::new();
        let mut m = |key: &str, color: [u8; 4]| materials.insert(key, color, None);
        let stone = m("stone", [125, 125, 125, 255]);
        let dirt = m("dirt", [134, 96, 67, 255]);
        let grass_top = m("grass_top", [95, 159, 53, 255]);
        let grass_side = m("grass_side", [118, 120, 60, 255]);
        let water = m("water", [47, 67, 244, 160]);
        let glass = m("glass", [220, 240, 250, 90]);
        let leaves = m("leaves", [60, 120, 40, 220]);
        let sand = m("sand", [219, 207, 163, 255]);
        let log_top = m("log_top", [160, 130, 80, 255]);
        let log_side = m("log_side", [102, 81, 51, 255]);
        let unknown_mid = m(UNKNOWN_MATERIAL, UNKNOWN_COLOR);

        let defs: [(&str, MaterialClass, MaterialId, MaterialId, MaterialId); 9] = [
            ("stone", MaterialClass::Opaque, stone, stone, stone),
            ("dirt", MaterialClass::Opaque, dirt, dirt, dirt),
            ("grass", MaterialClass::Opaque, grass_top, grass_side, dirt),
            ("water", MaterialClass::Liquid, water, water, water),
            ("glass", MaterialClass::Translucent, glass, glass, glass),
            ("leaves", MaterialClass::Cutout, leaves, leaves, leaves),
            ("sand", MaterialClass::Opaque, sand, sand, sand),
            ("log", MaterialClass::Opaque, log_top, log_side, log_top),
            ("unknown", MaterialClass::Opaque, unknown_mid, unknown_mid, unknown_mid),
        ];
        let mut blocks: Vec<Option<BlockType>> = vec![Some(air_type())];
        for (i, (name, class, top, side, bottom)) in defs.into_iter().enumerate() {
            let id = (i + 1) as BlockId;
            blocks.push(Some(BlockType::new(
                id,
                name.to_string(),
                class,
                CompiledMaterials::fixed(top, side, bottom),
                &BTreeMap::new(),
                unknown_mid,
            )));
        }
        let by_name: HashMap<String, BlockId> = blocks
            .iter()
            .flatten()
            .map(|t| (t.name.clone(), t.id))
            .collect();
        let unknown = blocks
            .last()
            .cloned()
            .flatten()
            .unwrap_or_else(|| unknown_type(u16::MAX, unknown_mid));
        BlockRegistry {
            materials,
            blocks,
            by_name,
            unknown,
        }
    }
}

fn air_type() -> BlockType {
    BlockType::new(
        0,
        "air".to_string(),
        MaterialClass::Air,
        CompiledMaterials::default(),
        &BTreeMap::new(),
        MaterialId::NONE,
    )
}

fn unknown_type(id: BlockId, mid: MaterialId) -> BlockType {
    BlockType::new(
        id,
        "unknown".to_string(),
        MaterialClass::Opaque,
        CompiledMaterials::fixed(mid, mid, mid),
        &BTreeMap::new(),
        mid,
    )
}

fn compile_materials(
    matcat: &MaterialCatalog,
    block: &str,
    mats: Option<MaterialsDef>,
) -> Result<CompiledMaterials, RegistryError> {
    let resolve_key = |key: &str| {
        matcat
            .get_id(key)
            .ok_or_else(|| RegistryError::UnknownMaterial {
                name: block.to_string(),
                material: key.to_string(),
            })
    };
    let resolve = |sel: Option<MaterialSelector>| -> Result<Option<ResolvedSelector>, RegistryError> {
        match sel {
            None => Ok(None),
            Some(MaterialSelector::Key(k)) => Ok(Some(ResolvedSelector::Fixed(resolve_key(&k)?))),
            Some(MaterialSelector::By { by, map }) => {
                let mut out = HashMap::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k, resolve_key(&v)?);
                }
                Ok(Some(ResolvedSelector::By { by, map: out }))
            }
        }
    };
    Ok(match mats {
        None => CompiledMaterials::default(),
        Some(MaterialsDef::All(key)) => CompiledMaterials {
            all: Some(ResolvedSelector::Fixed(resolve_key(&key)?)),
            ..CompiledMaterials::default()
        },
        Some(MaterialsDef::Faces {
            all,
            top,
            bottom,
            side,
        }) => CompiledMaterials {
            all: resolve(all)?,
            top: resolve(top)?,
            bottom: resolve(bottom)?,
            side: resolve(side)?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_defines_air_at_zero() {
        let reg = BlockRegistry::builtin();
        assert_eq!(reg.id_by_name("air"), Some(0));
        assert_eq!(reg.class_of(Block::AIR), MaterialClass::Air);
        let grass = reg.block("grass").unwrap();
        assert_ne!(
            reg.material_for(grass, FaceRole::Top),
            reg.material_for(grass, FaceRole::Side)
        );
    }

    #[test]
    fn undefined_ids_render_as_unknown() {
        let reg = BlockRegistry::builtin();
        let odd = Block::new(4000);
        assert_eq!(reg.class_of(odd), MaterialClass::Opaque);
        let mid = reg.material_for(odd, FaceRole::Side);
        assert_eq!(reg.materials.get(mid).unwrap().key, "unknown");
    }

    #[test]
    fn stone_face_against_stone_is_hidden() {
        let reg = BlockRegistry::builtin();
        let stone = reg.block("stone").unwrap();
        let glass = reg.block("glass").unwrap();
        assert!(!reg.face_visible(stone, stone));
        assert!(reg.face_visible(stone, Block::AIR));
        assert!(reg.face_visible(stone, glass));
        assert!(!reg.face_visible(glass, glass));
        assert!(!reg.face_visible(glass, stone));
    }
}
