use serde::{Deserialize, Serialize};

/// Rendering class of a block type. Visibility, occlusion and merging are all
/// looked up from [`RULES`] rather than derived from ad-hoc flags.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialClass {
    Air,
    #[default]
    Opaque,
    /// Alpha-tested geometry (leaves, grates): drawn, never hides neighbors.
    Cutout,
    Translucent,
    Liquid,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MaterialRules {
    /// Has faces at all.
    pub visible: bool,
    /// Hides the touching face of a neighbor.
    pub occludes: bool,
    /// Two adjacent blocks of the same type hide their shared faces.
    pub self_culls: bool,
    /// Faces may be greedy-merged into larger quads.
    pub mergeable: bool,
}

pub const RULES: [MaterialRules; 5] = [
    // Air
    MaterialRules {
        visible: false,
        occludes: false,
        self_culls: false,
        mergeable: false,
    },
    // Opaque
    MaterialRules {
        visible: true,
        occludes: true,
        self_culls: true,
        mergeable: true,
    },
    // Cutout
    MaterialRules {
        visible: true,
        occludes: false,
        self_culls: false,
        mergeable: false,
    },
    // Translucent
    MaterialRules {
        visible: true,
        occludes: false,
        self_culls: true,
        mergeable: true,
    },
    // Liquid
    MaterialRules {
        visible: true,
        occludes: false,
        self_culls: true,
        mergeable: true,
    },
];

impl MaterialClass {
    #[inline]
    pub fn index(self) -> usize {
        match self {
            MaterialClass::Air => 0,
            MaterialClass::Opaque => 1,
            MaterialClass::Cutout => 2,
            MaterialClass::Translucent => 3,
            MaterialClass::Liquid => 4,
        }
    }

    #[inline]
    pub fn rules(self) -> &'static MaterialRules {
        &RULES[self.index()]
    }
}

/// Whether the face of a block of class `own` is drawn when it touches a block
/// of class `other`. `same_type` is true when both blocks share a block id.
#[inline]
pub fn face_visible(own: MaterialClass, other: MaterialClass, same_type: bool) -> bool {
    let a = own.rules();
    if !a.visible {
        return false;
    }
    let b = other.rules();
    if b.occludes {
        return false;
    }
    !(same_type && a.self_culls)
}
