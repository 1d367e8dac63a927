use std::collections::HashMap;

use proptest::prelude::*;
use tessera_blocks::{Block, BlockRegistry, FaceRole, MaterialCatalog, MaterialClass, RegistryError};

const MATERIALS: &str = r#"
[materials]
stone = [125, 125, 125]
wool_red = [200, 30, 30]
wool_blue = [30, 30, 200]
water = { color = [40, 60, 240, 160], render_tag = "water" }
"#;

const BLOCKS: &str = r#"
unknown_block = "stone"

[[blocks]]
name = "air"
class = "air"

[[blocks]]
name = "stone"
materials = "stone"

[[blocks]]
name = "water"
id = 7
class = "liquid"
materials = "water"

[[blocks]]
name = "wool"
materials = { all = { by = "color", map = { red = "wool_red", blue = "wool_blue" } } }
state_schema = { color = ["red", "blue"] }
"#;

#[test]
fn material_catalog_reserves_zero_id() {
    let materials = MaterialCatalog::from_toml_str(MATERIALS).unwrap();
    assert!(materials.materials[0].key.is_empty());
    assert!(materials.get_id("stone").unwrap().0 > 0);
    assert_eq!(materials.color(materials.get_id("water").unwrap())[3], 160);
}

#[test]
fn registry_from_toml_assigns_ids_after_explicit_ones() {
    let reg = BlockRegistry::from_toml_strs(MATERIALS, BLOCKS).unwrap();
    assert_eq!(reg.id_by_name("stone"), Some(1));
    assert_eq!(reg.id_by_name("water"), Some(7));
    assert_eq!(reg.id_by_name("wool"), Some(8));
    assert_eq!(reg.class_of(Block::new(7)), MaterialClass::Liquid);
    // unknown ids fall back to the configured block
    assert_eq!(reg.unknown_block_id(), 1);
    assert_eq!(reg.class_of(Block::new(3)), MaterialClass::Opaque);
}

#[test]
fn state_selects_material() {
    let reg = BlockRegistry::from_toml_strs(MATERIALS, BLOCKS).unwrap();
    let blue = reg
        .make_block_by_name("wool", &HashMap::from([("color".into(), "blue".into())]))
        .unwrap();
    let red = reg.make_block_by_name("wool", &HashMap::new()).unwrap();
    assert_eq!(reg.material_for(blue, FaceRole::Top), reg.materials.get_id("wool_blue").unwrap());
    assert_eq!(reg.material_for(red, FaceRole::Side), reg.materials.get_id("wool_red").unwrap());
}

#[test]
fn unknown_material_is_an_error() {
    let err = BlockRegistry::from_toml_strs(
        MATERIALS,
        r#"
        [[blocks]]
        name = "granite"
        materials = "granite"
        "#,
    )
    .unwrap_err();
    assert!(matches!(err, RegistryError::UnknownMaterial { .. }));
}

#[test]
fn duplicate_ids_are_rejected() {
    let err = BlockRegistry::from_toml_strs(
        MATERIALS,
        r#"
        [[blocks]]
        name = "a"
        id = 3
        [[blocks]]
        name = "b"
        id = 3
        "#,
    )
    .unwrap_err();
    assert!(matches!(err, RegistryError::DuplicateId { id: 3, .. }));
}

fn class_strategy() -> impl Strategy<Value = MaterialClass> {
    prop_oneof![
        Just(MaterialClass::Air),
        Just(MaterialClass::Opaque),
        Just(MaterialClass::Cutout),
        Just(MaterialClass::Translucent),
        Just(MaterialClass::Liquid),
    ]
}

proptest! {
    // A shared face between two opaque blocks is never drawn from either side,
    // and air never contributes a face.
    #[test]
    fn culling_rule_is_consistent(a in class_strategy(), b in class_strategy(), same in any::<bool>()) {
        let visible = tessera_blocks::face_visible(a, b, same);
        if a == MaterialClass::Air || b == MaterialClass::Opaque {
            prop_assert!(!visible);
        }
        if a.rules().visible && b == MaterialClass::Air {
            prop_assert!(visible);
        }
    }
}
