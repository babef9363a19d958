//! Serializable definition structs for shader libraries and the variant-ID
//! algebra.
//!
//! Variant ID layout:
//!
//! Let `Fc` and `Mc` be the flag and mode counts declared by a repo, and
//! `Fv = 2 ^ Fc` the number of flag combinations. A config ID packs a flag
//! bitset and mode index as `Cid = F + M * Fv`, so `F = Cid % Fv` and
//! `M = Cid / Fv`. The full 32-bit variant ID adds the repo index in the high
//! bits: `Vid = (Ri << 16) | (Cid & 0xFFFF)`.

use crate::shader_types::ShaderTypes;

pub type StringId = u32;

/// Sentinel for absent string or registry IDs.
pub const INVALID_ID: u32 = u32::MAX;

pub const VARIANT_GROUP_OFFSET: u32 = 16;
pub const VARIANT_MASK: u32 = 0xFFFF;

/// Packs a repo index and config index into a variant ID.
pub fn variant_id(repo_index: u32, config_id: u32) -> u32 {
    (repo_index << VARIANT_GROUP_OFFSET) | (config_id & VARIANT_MASK)
}

/// Extracts the repo index from a variant ID.
pub fn repo_index(v_id: u32) -> u32 {
    v_id >> VARIANT_GROUP_OFFSET
}

/// Extracts the intra-repo config index from a variant ID.
pub fn config_index(v_id: u32) -> u32 {
    v_id & VARIANT_MASK
}

/// Pipeline stage a shader entrypoint binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ShadeStage {
    Vertex = 0,
    Hull = 1,
    Domain = 2,
    Geometry = 3,
    Pixel = 4,
    Compute = 5,
}

impl ShadeStage {
    pub const COUNT: usize = 6;

    pub const ALL: [ShadeStage; Self::COUNT] = [
        ShadeStage::Vertex,
        ShadeStage::Hull,
        ShadeStage::Domain,
        ShadeStage::Geometry,
        ShadeStage::Pixel,
        ShadeStage::Compute,
    ];

    /// Shader-model target prefix for this stage, e.g. `vs_` + feature level.
    pub fn target_prefix(self) -> &'static str {
        match self {
            ShadeStage::Vertex => "vs_",
            ShadeStage::Hull => "hs_",
            ShadeStage::Domain => "ds_",
            ShadeStage::Geometry => "gs_",
            ShadeStage::Pixel => "ps_",
            ShadeStage::Compute => "cs_",
        }
    }

    /// Maps a stage pragma or block keyword to its stage.
    pub fn from_keyword(name: &str) -> Option<ShadeStage> {
        Some(match name {
            "vertex" => ShadeStage::Vertex,
            "hull" => ShadeStage::Hull,
            "domain" => ShadeStage::Domain,
            "geometry" => ShadeStage::Geometry,
            "pixel" => ShadeStage::Pixel,
            "compute" => ShadeStage::Compute,
            _ => return None,
        })
    }

    pub fn from_u8(value: u8) -> Option<ShadeStage> {
        Self::ALL.get(value as usize).copied()
    }
}

/// Graphics API the library was compiled against. A tag in the output, not a
/// divergent code path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PlatformTarget {
    DirectX11 = 0,
    DirectX12 = 1,
}

impl PlatformTarget {
    pub fn from_u8(value: u8) -> Option<PlatformTarget> {
        match value {
            0 => Some(PlatformTarget::DirectX11),
            1 => Some(PlatformTarget::DirectX12),
            _ => None,
        }
    }
}

/// Identifies the toolchain a library was built with. Libraries built on
/// mismatched platforms cannot be reused as caches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformDef {
    pub preproc_version: String,
    pub preproc_build: u32,
    pub backend_version: String,
    pub feature_level: String,
    pub target: PlatformTarget,
}

/// A single named constant inside a constant buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConstDef {
    pub string_id: StringId,
    pub offset: u32,
    pub size: u32,
}

/// Constant buffer layout: name, total size and a group of [`ConstDef`] IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConstBufDef {
    pub string_id: StringId,
    pub size: u32,
    pub layout_id: u32,
}

/// One element of a shader input or output signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IOElementDef {
    pub semantic_id: StringId,
    pub semantic_index: u32,
    pub data_type: u32,
    pub component_count: u32,
    pub size: u32,
}

/// A bound, non-cbuffer resource: texture, buffer or sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceDef {
    pub string_id: StringId,
    pub kind: ShaderTypes,
    pub slot: u32,
}

/// A compiled shader and the registry IDs of its reflected metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderDef {
    pub file_id: StringId,
    pub byte_code_id: u32,
    pub name_id: StringId,
    pub stage: ShadeStage,
    pub thread_group_size: (u32, u32, u32),
    pub in_layout_id: Option<u32>,
    pub out_layout_id: Option<u32>,
    pub res_layout_id: Option<u32>,
    pub cbuf_group_id: Option<u32>,
}

/// A named ordered set of passes. `pass_group_id` points at a group of pass
/// IDs; each pass is itself a group of shader IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EffectDef {
    pub name_id: StringId,
    pub pass_group_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderVariantDef {
    pub shader_id: u32,
    pub variant_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectVariantDef {
    pub effect_id: u32,
    pub variant_id: u32,
}

/// Shaders and effects generated for one preprocessor configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariantDef {
    pub shaders: Vec<ShaderVariantDef>,
    pub effects: Vec<EffectVariantDef>,
}

/// Flag and mode names declared by one repo. Order determines flag bit
/// position and mode index; mode 0 is the implicit default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigTableDef {
    pub flag_ids: Vec<StringId>,
    pub mode_ids: Vec<StringId>,
}

impl ConfigTableDef {
    /// Total number of flag bit combinations, `2 ^ flag count`.
    pub fn flag_combinations(&self) -> u32 {
        1u32 << self.flag_ids.len() as u32
    }

    pub fn mode_count(&self) -> u32 {
        (self.mode_ids.len() as u32).max(1)
    }

    /// Total configs declared by the repo.
    pub fn config_count(&self) -> u32 {
        self.flag_combinations() * self.mode_count()
    }
}

/// One input repository and everything generated from it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariantRepoDef {
    pub path: String,
    pub source_size_bytes: u32,
    pub source_crc32: u32,
    pub config_table: ConfigTableDef,
    pub variants: Vec<VariantDef>,
}

/// The deduplicated arenas backing a shader library. IDs stored in any entry
/// always refer to entries already present; the graph is a DAG.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderRegistryDef {
    pub constants: Vec<ConstDef>,
    pub const_bufs: Vec<ConstBufDef>,
    pub io_elements: Vec<IOElementDef>,
    pub resources: Vec<ResourceDef>,
    pub id_groups: Vec<Vec<u32>>,
    pub byte_code: Vec<Vec<u8>>,
    pub shaders: Vec<ShaderDef>,
    pub effects: Vec<EffectDef>,
}

/// The complete serialized library artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct ShaderLibDef {
    pub name: String,
    pub platform: PlatformDef,
    pub repos: Vec<VariantRepoDef>,
    pub registry: ShaderRegistryDef,
    pub strings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_id_round_trips() {
        let v = variant_id(3, 0x2A);
        assert_eq!(repo_index(v), 3);
        assert_eq!(config_index(v), 0x2A);
        assert_eq!(v, (3 << 16) | 0x2A);
    }

    #[test]
    fn config_counts() {
        let table = ConfigTableDef {
            flag_ids: vec![1, 2],
            mode_ids: vec![0, 3, 4],
        };
        assert_eq!(table.flag_combinations(), 4);
        assert_eq!(table.mode_count(), 3);
        assert_eq!(table.config_count(), 12);

        let empty = ConfigTableDef::default();
        assert_eq!(empty.config_count(), 1);
    }

    #[test]
    fn stage_keywords() {
        assert_eq!(ShadeStage::from_keyword("vertex"), Some(ShadeStage::Vertex));
        assert_eq!(ShadeStage::from_keyword("compute"), Some(ShadeStage::Compute));
        assert_eq!(ShadeStage::from_keyword("technique"), None);
        assert_eq!(ShadeStage::Pixel.target_prefix(), "ps_");
    }
}
