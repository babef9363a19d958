//! Runtime library map: immutable name-based lookup over a deserialized
//! library definition.
//!
//! A library may be built on one thread and read concurrently once
//! construction has finished; nothing here mutates after `new`.

use rustc_hash::FxHashMap;

use crate::config::ConfigIdTable;
use crate::data::{
    config_index, repo_index, variant_id, ShaderLibDef, StringId, VariantRepoDef, INVALID_ID,
};
use crate::registry::{EffectDefHandle, ShaderDefHandle, ShaderRegistryMap};
use crate::strings::StringRegistry;

type NameIndexMap = FxHashMap<StringId, u32>;

#[derive(Default)]
struct VariantNameMap {
    shaders: NameIndexMap,
    effects: NameIndexMap,
}

/// Translation between a shared parent interner and the library's own string
/// table.
struct StringAlias {
    /// local ID -> shared ID
    to_shared: Vec<StringId>,
    /// shared ID -> local ID
    from_shared: FxHashMap<StringId, StringId>,
}

/// Immutable runtime view over a [`ShaderLibDef`].
pub struct ShaderLibMap {
    name: String,
    platform: crate::data::PlatformDef,
    registry: ShaderRegistryMap,
    repos: Vec<VariantRepoDef>,
    config_tables: Vec<ConfigIdTable>,
    /// Per-repo, per-config name lookup tables.
    variant_maps: Vec<Vec<VariantNameMap>>,
    /// Name -> default variant ID across the whole library.
    shared_shaders: NameIndexMap,
    shared_effects: NameIndexMap,
    alias: Option<StringAlias>,
}

impl ShaderLibMap {
    pub fn new(def: ShaderLibDef) -> Self {
        Self::build(def, None)
    }

    /// Builds a map whose public name-ID surface lives in `shared`: incoming
    /// IDs are translated from the shared interner, outgoing IDs into it.
    pub fn with_shared_strings(def: ShaderLibDef, shared: &mut StringRegistry) -> Self {
        let to_shared: Vec<StringId> = def.strings.iter().map(|s| shared.intern(s)).collect();
        let mut from_shared = FxHashMap::default();
        for (local, &shared_id) in to_shared.iter().enumerate() {
            from_shared.insert(shared_id, local as u32);
        }
        Self::build(
            def,
            Some(StringAlias {
                to_shared,
                from_shared,
            }),
        )
    }

    fn build(def: ShaderLibDef, alias: Option<StringAlias>) -> Self {
        let registry = ShaderRegistryMap::new(def.registry, def.strings);
        let repo_count = def.repos.len();

        let mut this = ShaderLibMap {
            name: def.name,
            platform: def.platform,
            registry,
            repos: def.repos,
            config_tables: Vec::with_capacity(repo_count),
            variant_maps: Vec::with_capacity(repo_count),
            shared_shaders: NameIndexMap::default(),
            shared_effects: NameIndexMap::default(),
            alias,
        };
        this.init_maps();
        this
    }

    fn init_maps(&mut self) {
        for (repo_idx, repo) in self.repos.iter().enumerate() {
            self.config_tables
                .push(ConfigIdTable::new(repo.config_table.clone()));

            // the base variant provides the default repo for each name
            let base_v_id = variant_id(repo_idx as u32, 0);
            if let Some(base) = repo.variants.first() {
                for pair in &base.shaders {
                    let name_id = self.registry.shader(pair.shader_id).name_id;
                    self.shared_shaders.entry(name_id).or_insert(base_v_id);
                }
                for pair in &base.effects {
                    let name_id = self.registry.effect(pair.effect_id).name_id;
                    self.shared_effects.entry(name_id).or_insert(base_v_id);
                }
            }

            let mut config_maps = Vec::with_capacity(repo.variants.len());
            for variant in &repo.variants {
                let mut map = VariantNameMap::default();
                for pair in &variant.shaders {
                    let name_id = self.registry.shader(pair.shader_id).name_id;
                    map.shaders.insert(name_id, pair.shader_id);
                }
                for pair in &variant.effects {
                    let name_id = self.registry.effect(pair.effect_id).name_id;
                    map.effects.insert(name_id, pair.effect_id);
                }
                config_maps.push(map);
            }
            self.variant_maps.push(config_maps);
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn platform(&self) -> &crate::data::PlatformDef {
        &self.platform
    }

    pub fn registry(&self) -> &ShaderRegistryMap {
        &self.registry
    }

    pub fn repos(&self) -> &[VariantRepoDef] {
        &self.repos
    }

    /// Reassembles the library definition, e.g. for re-serialization.
    pub fn definition(&self) -> ShaderLibDef {
        ShaderLibDef {
            name: self.name.clone(),
            platform: self.platform.clone(),
            repos: self.repos.clone(),
            registry: self.registry.definition().clone(),
            strings: self.registry.strings().to_table(),
        }
    }

    fn to_local(&self, name_id: StringId) -> Option<StringId> {
        match &self.alias {
            Some(alias) => alias.from_shared.get(&name_id).copied(),
            None => Some(name_id),
        }
    }

    fn to_public(&self, name_id: StringId) -> StringId {
        match &self.alias {
            Some(alias) => alias
                .to_shared
                .get(name_id as usize)
                .copied()
                .unwrap_or(INVALID_ID),
            None => name_id,
        }
    }

    pub fn shader(&self, shader_id: u32) -> ShaderDefHandle<'_> {
        assert_ne!(shader_id, INVALID_ID, "shader ID invalid");
        ShaderDefHandle::new(&self.registry, shader_id)
    }

    pub fn effect(&self, effect_id: u32) -> EffectDefHandle<'_> {
        assert_ne!(effect_id, INVALID_ID, "effect ID invalid");
        EffectDefHandle::new(&self.registry, effect_id)
    }

    /// Default variant ID for the named shader, searching every repo.
    pub fn try_default_shader_variant(&self, name_id: StringId) -> Option<u32> {
        let local = self.to_local(name_id)?;
        self.shared_shaders.get(&local).copied()
    }

    /// Default variant ID for the named effect, searching every repo.
    pub fn try_default_effect_variant(&self, name_id: StringId) -> Option<u32> {
        let local = self.to_local(name_id)?;
        self.shared_effects.get(&local).copied()
    }

    pub fn try_shader_id(&self, name_id: StringId, v_id: u32) -> Option<u32> {
        let local = self.to_local(name_id)?;
        let maps = self.variant_maps.get(repo_index(v_id) as usize)?;
        let map = maps.get(config_index(v_id) as usize)?;
        map.shaders.get(&local).copied()
    }

    pub fn try_effect_id(&self, name_id: StringId, v_id: u32) -> Option<u32> {
        let local = self.to_local(name_id)?;
        let maps = self.variant_maps.get(repo_index(v_id) as usize)?;
        let map = maps.get(config_index(v_id) as usize)?;
        map.effects.get(&local).copied()
    }

    pub fn try_shader_id_by_name(&self, name: &str, v_id: u32) -> Option<u32> {
        let local = self.registry.try_string_id(name)?;
        let maps = self.variant_maps.get(repo_index(v_id) as usize)?;
        maps.get(config_index(v_id) as usize)?
            .shaders
            .get(&local)
            .copied()
    }

    pub fn try_effect_id_by_name(&self, name: &str, v_id: u32) -> Option<u32> {
        let local = self.registry.try_string_id(name)?;
        let maps = self.variant_maps.get(repo_index(v_id) as usize)?;
        maps.get(config_index(v_id) as usize)?
            .effects
            .get(&local)
            .copied()
    }

    /// True if the named flag or mode is set for the given variant.
    pub fn is_defined(&self, name_id: StringId, v_id: u32) -> bool {
        let Some(local) = self.to_local(name_id) else {
            return false;
        };
        let Some(table) = self.config_tables.get(repo_index(v_id) as usize) else {
            return false;
        };
        table.is_defined(local, config_index(v_id))
    }

    pub fn is_defined_by_name(&self, name: &str, v_id: u32) -> bool {
        match self.registry.try_string_id(name) {
            Some(local) => match self.config_tables.get(repo_index(v_id) as usize) {
                Some(table) => table.is_defined(local, config_index(v_id)),
                None => false,
            },
            None => false,
        }
    }

    /// All flag and mode names set for the given variant.
    pub fn defines(&self, v_id: u32) -> Vec<StringId> {
        let mut names = Vec::new();
        if let Some(table) = self.config_tables.get(repo_index(v_id) as usize) {
            table.get_defines(config_index(v_id), &mut names);
        }
        for name in &mut names {
            *name = self.to_public(*name);
        }
        names
    }

    /// Variant ID with the named flag set to `value`; `INVALID_ID` for an
    /// unknown flag.
    pub fn set_flag(&self, name_id: StringId, value: bool, v_id: u32) -> u32 {
        let repo = repo_index(v_id);
        let Some(local) = self.to_local(name_id) else {
            return INVALID_ID;
        };
        match self
            .config_tables
            .get(repo as usize)
            .and_then(|t| t.set_flag(local, value, config_index(v_id)))
        {
            Some(config) => variant_id(repo, config),
            None => INVALID_ID,
        }
    }

    /// Variant ID with the named mode selected; `INVALID_ID` for an unknown
    /// mode.
    pub fn set_mode(&self, name_id: StringId, v_id: u32) -> u32 {
        let repo = repo_index(v_id);
        let Some(local) = self.to_local(name_id) else {
            return INVALID_ID;
        };
        match self
            .config_tables
            .get(repo as usize)
            .and_then(|t| t.set_mode(local, config_index(v_id)))
        {
            Some(config) => variant_id(repo, config),
            None => INVALID_ID,
        }
    }

    /// Variant ID with the mode reset to the default.
    pub fn reset_mode(&self, v_id: u32) -> u32 {
        let repo = repo_index(v_id);
        match self.config_tables.get(repo as usize) {
            Some(table) => variant_id(repo, table.reset_mode(config_index(v_id))),
            None => INVALID_ID,
        }
    }

    /// Default variant of the same repo: clears the config bits.
    pub fn reset_variant(&self, v_id: u32) -> u32 {
        v_id & !crate::data::VARIANT_MASK
    }

    pub fn shader_count(&self, v_id: u32) -> usize {
        self.repos
            .get(repo_index(v_id) as usize)
            .and_then(|r| r.variants.get(config_index(v_id) as usize))
            .map_or(0, |v| v.shaders.len())
    }

    pub fn effect_count(&self, v_id: u32) -> usize {
        self.repos
            .get(repo_index(v_id) as usize)
            .and_then(|r| r.variants.get(config_index(v_id) as usize))
            .map_or(0, |v| v.effects.len())
    }
}
