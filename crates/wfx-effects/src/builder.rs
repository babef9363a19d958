//! Shader library builder: drives preprocessing, analysis, generation and
//! compilation over every variant of every repository, deduplicating all
//! outputs into the registry and reusing cached results where sources are
//! unchanged.

use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use crate::backend::{register_shader, CompileInput, ShaderBackend};
use crate::data::{
    variant_id, ConfigTableDef, EffectDef, EffectVariantDef, PlatformDef, PlatformTarget,
    ShaderLibDef, ShaderVariantDef, StringId, VariantDef, VariantRepoDef, INVALID_ID,
};
use crate::error::{EffectError, Result};
use crate::generator::ShaderGenerator;
use crate::libmap::ShaderLibMap;
use crate::parser::blocks::BlockAnalyzer;
use crate::parser::matcher::SymbolParser;
use crate::parser::symbols::{
    stage_from_symbol_flags, stage_from_token_flags, ScopeBuilder, SymbolTypes, TokenTypes,
};
use crate::preprocessor::{IncludeHandler, ShaderEntrypoint, VariantPreprocessor};
use crate::registry::ShaderRegistryBuilder;

/// Name synthesized for the single pass of an effect declaring its shaders at
/// technique scope.
pub const DEFAULTED_PASS_NAME: &str = "DefaultedPass";

pub const PREPROC_BUILD: u32 = 1;

/// Counts of definitions recovered from the cache during a merged build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub cached_repo_count: u32,
    pub cached_shader_count: u32,
    pub cached_effect_count: u32,
    pub cached_resource_count: u32,
}

/// Ring of recently emitted variant texts used to detect unused flag/mode
/// combinations.
#[derive(Default, Clone)]
struct VariantSlot {
    text: String,
    config_id: u32,
}

const VARIANT_RING_SIZE: usize = 4;

struct EffectBlock {
    name_id: StringId,
    pass_start: usize,
    pass_count: usize,
}

struct PassBlock {
    shader_start: usize,
    shader_count: usize,
}

struct CacheLib {
    map: ShaderLibMap,
    path_index: FxHashMap<String, usize>,
}

/// Orchestrates one library build.
pub struct ShaderLibBuilder {
    name: String,
    platform: PlatformDef,
    debug: bool,

    backend: Box<dyn ShaderBackend>,
    preproc: VariantPreprocessor,
    analyzer: BlockAnalyzer,
    scope: ScopeBuilder,
    parser: SymbolParser,
    generator: ShaderGenerator,
    registry: ShaderRegistryBuilder,

    repos: Vec<VariantRepoDef>,
    ring: Vec<VariantSlot>,
    ring_index: usize,

    cache: Option<CacheLib>,
    cache_hits: Vec<usize>,
    stats: CacheStats,

    entrypoints: Vec<ShaderEntrypoint>,
    ep_shader_ids: FxHashMap<StringId, u32>,
    effect_blocks: Vec<EffectBlock>,
    effect_passes: Vec<PassBlock>,
    effect_shaders: Vec<u32>,
    hlsl_buf: String,
    variant_buf: String,
}

impl ShaderLibBuilder {
    pub fn new(backend: Box<dyn ShaderBackend>) -> Self {
        let platform = PlatformDef {
            preproc_version: env!("CARGO_PKG_VERSION").to_string(),
            preproc_build: PREPROC_BUILD,
            backend_version: backend.version(),
            feature_level: "5_0".to_string(),
            target: PlatformTarget::DirectX11,
        };

        ShaderLibBuilder {
            name: String::new(),
            platform,
            debug: false,
            backend,
            preproc: VariantPreprocessor::new(),
            analyzer: BlockAnalyzer::new(),
            scope: ScopeBuilder::new(),
            parser: SymbolParser::new(),
            generator: ShaderGenerator::new(),
            registry: ShaderRegistryBuilder::new(),
            repos: Vec::new(),
            ring: vec![VariantSlot::default(); VARIANT_RING_SIZE],
            ring_index: 0,
            cache: None,
            cache_hits: Vec::new(),
            stats: CacheStats::default(),
            entrypoints: Vec::new(),
            ep_shader_ids: FxHashMap::default(),
            effect_blocks: Vec::new(),
            effect_passes: Vec::new(),
            effect_shaders: Vec::new(),
            hlsl_buf: String::new(),
            variant_buf: String::new(),
        }
    }

    pub fn set_name(&mut self, name: &str) {
        self.name.clear();
        self.name.push_str(name);
    }

    pub fn set_target(&mut self, target: PlatformTarget) {
        self.platform.target = target;
    }

    pub fn set_feature_level(&mut self, feature_level: &str) {
        self.platform.feature_level = feature_level.to_string();
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    pub fn platform(&self) -> &PlatformDef {
        &self.platform
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.stats
    }

    /// Supplies a previously built library for incremental reuse. Platform
    /// mismatches are logged and the cache ignored.
    pub fn set_cache(&mut self, cached: ShaderLibDef) {
        if self.platform != cached.platform {
            info!(
                name = %cached.name,
                "shader cache platform mismatch; falling back to full reprocessing"
            );
            return;
        }

        info!(name = %cached.name, "using shader cache");
        let map = ShaderLibMap::new(cached);
        let mut path_index = FxHashMap::default();
        for (i, repo) in map.repos().iter().enumerate() {
            path_index.insert(repo.path.clone(), i);
        }
        self.cache = Some(CacheLib { map, path_index });
        self.cache_hits.clear();
    }

    /// Processes one repository source, or records a cache hit when the
    /// cached entry matches by CRC and size.
    pub fn add_repo(
        &mut self,
        path: &str,
        source: &str,
        mut includes: Option<&mut dyn IncludeHandler>,
    ) -> Result<()> {
        if path.is_empty() || source.is_empty() {
            return Err(EffectError::parse("repo path or source is empty"));
        }

        let repo_index = self.repos.len() as u32;
        let crc = crc32fast::hash(source.as_bytes());
        self.preproc.set_source(path, source);

        if let Some(cached_index) = self.try_get_cached_repo(path) {
            let cache = self.cache.as_ref().expect("cache present");
            let repo = &cache.map.repos()[cached_index];

            if repo.source_size_bytes as usize == source.len() && repo.source_crc32 == crc {
                debug!(path, "cache hit for repository");
                self.cache_hits.push(cached_index);
                return Ok(());
            }
            debug!(path, "cache miss: source changed, reprocessing");
        }

        let mut repo = VariantRepoDef {
            path: path.to_string(),
            source_size_bytes: source.len() as u32,
            source_crc32: crc,
            ..Default::default()
        };

        // duplicate detection is per repo
        for slot in &mut self.ring {
            slot.text.clear();
            slot.config_id = 0;
        }
        self.ring_index = 0;

        // the variant count grows as config 0 registers pragmas
        let mut config_id = 0u32;
        while config_id < self.preproc.variant_count() {
            self.add_repo_configuration(
                path,
                config_id,
                repo_index,
                &mut repo,
                match includes {
                    Some(ref mut h) => Some(&mut **h),
                    None => None,
                },
            )?;
            self.clear_variant();
            config_id += 1;
        }

        self.repos.push(repo);
        Ok(())
    }

    fn try_get_cached_repo(&self, path: &str) -> Option<usize> {
        self.cache
            .as_ref()
            .and_then(|cache| cache.path_index.get(path).copied())
    }

    fn add_repo_configuration(
        &mut self,
        path: &str,
        config_id: u32,
        repo_index: u32,
        repo: &mut VariantRepoDef,
        includes: Option<&mut dyn IncludeHandler>,
    ) -> Result<()> {
        let v_id = variant_id(repo_index, config_id);

        self.variant_buf.clear();
        let mut buf = std::mem::take(&mut self.variant_buf);
        let result = self.preproc.get_variant(config_id, includes, &mut buf);
        self.variant_buf = buf;
        self.entrypoints = result?;

        // repo tables initialize once the first config has registered its
        // pragmas
        if config_id == 0 {
            self.init_repo(repo)?;
        }

        // check the ring of recently emitted variants for textual repeats
        let duplicate_of = self
            .ring
            .iter()
            .take(self.repo_configs_seen(repo, config_id))
            .position(|slot| slot.text == self.variant_buf)
            .map(|i| self.ring[i].config_id);

        if let Some(prior_config) = duplicate_of {
            let mut variant = repo.variants[prior_config as usize].clone();
            for shader in &mut variant.shaders {
                shader.variant_id = v_id;
            }
            for effect in &mut variant.effects {
                effect.variant_id = v_id;
            }
            repo.variants[config_id as usize] = variant;

            warn!(v_id, "unused flag/mode combination detected; skipped");
            return Ok(());
        }

        let entry_count = self.registry.unique_entry_count();

        self.analyzer.analyze(path, &self.variant_buf)?;
        self.parser.parse(&self.analyzer, &mut self.scope)?;

        // shaders
        self.resolve_entrypoints()?;
        repo.variants[config_id as usize].shaders = self.compile_entrypoints(path, v_id)?;

        // effects
        self.collect_effects()?;
        repo.variants[config_id as usize].effects = self.build_effect_defs(v_id)?;

        if entry_count == self.registry.unique_entry_count() {
            warn!(v_id, "unused flag/mode combination detected; not skipped");
        }

        let slot = &mut self.ring[self.ring_index];
        slot.text.clear();
        slot.text.push_str(&self.variant_buf);
        slot.config_id = config_id;
        self.ring_index = (self.ring_index + 1) % VARIANT_RING_SIZE;

        Ok(())
    }

    /// Number of ring slots that can hold earlier configs of this repo.
    fn repo_configs_seen(&self, _repo: &VariantRepoDef, config_id: u32) -> usize {
        (config_id as usize).min(VARIANT_RING_SIZE)
    }

    fn init_repo(&mut self, repo: &mut VariantRepoDef) -> Result<()> {
        let mut table = ConfigTableDef::default();

        for flag in self.preproc.variant_flags() {
            table.flag_ids.push(self.registry.get_or_add_string(flag));
        }
        for mode in self.preproc.variant_modes() {
            table.mode_ids.push(self.registry.get_or_add_string(mode));
        }

        repo.config_table = table;
        repo.variants = vec![VariantDef::default(); self.preproc.variant_count() as usize];

        info!(variants = repo.variants.len(), "variants declared");
        if repo.variants.is_empty() {
            return Err(EffectError::parse("no shader variants declared"));
        }
        Ok(())
    }

    fn clear_variant(&mut self) {
        self.scope.clear();
        self.parser.clear();
        self.analyzer.clear();
        self.generator.clear();

        self.entrypoints.clear();
        self.ep_shader_ids.clear();
        self.effect_blocks.clear();
        self.effect_passes.clear();
        self.effect_shaders.clear();
        self.hlsl_buf.clear();
    }

    /// Discovers entrypoints: attribute-tagged functions first, then pragma
    /// declarations, then shader blocks. Deduplicated by name.
    fn resolve_entrypoints(&mut self) -> Result<()> {
        let pragma_eps = std::mem::take(&mut self.entrypoints);
        self.ep_shader_ids.clear();

        // attribute-tagged function definitions
        for symbol_id in 0..self.scope.symbol_count() as u32 {
            let symbol = self.scope.symbol(symbol_id);
            if !symbol.has_flags(SymbolTypes::FUNC_DEFINITION) {
                continue;
            }

            let ident = symbol.ident();
            let Some(attrib) = ident
                .children()
                .find(|c| c.has_flags(TokenTypes::ATTRIB_SHADER_DECL))
            else {
                continue;
            };

            let name = ident.value();
            let name_id = self.registry.get_or_add_string(name);
            if self.ep_shader_ids.contains_key(&name_id) {
                continue;
            }

            let stage = stage_from_token_flags(attrib.flags()).ok_or_else(|| {
                EffectError::parse(format!("stage attribute on '{name}' has no stage"))
            })?;

            self.ep_shader_ids.insert(name_id, INVALID_ID);
            let mut ep = ShaderEntrypoint::new(name, stage);
            ep.symbol_id = symbol_id;
            self.entrypoints.push(ep);
        }

        // pragma-declared entrypoints resolve against global overloads
        for mut ep in pragma_eps {
            let name_id = self.registry.get_or_add_string(&ep.name);
            if self.ep_shader_ids.contains_key(&name_id) {
                continue;
            }

            let overloads = self
                .scope
                .try_get_func_overloads(&ep.name, Some(0))
                .filter(|list| !list.is_empty());

            let Some(overloads) = overloads else {
                return Err(self.analyzer.syntax_error(
                    0,
                    format!(
                        "definition for shader '{}' declared in pragma not found",
                        ep.name
                    ),
                ));
            };

            self.ep_shader_ids.insert(name_id, INVALID_ID);
            ep.symbol_id = overloads[0];
            self.entrypoints.push(ep);
        }

        // shader blocks must contain an overload of their own name
        for symbol_id in 0..self.scope.symbol_count() as u32 {
            let symbol = self.scope.symbol(symbol_id);
            if !symbol.has_flags(SymbolTypes::SHADER_DEF) {
                continue;
            }

            let name = symbol.name();
            let scope = symbol.scope().expect("shader block declares a scope");
            let overloads = scope.func_overloads(name).filter(|list| !list.is_empty());

            let Some(overloads) = overloads else {
                return Err(self.analyzer.syntax_error(
                    symbol.ident().block_start() as usize,
                    format!("could not find entrypoint for shader block '{name}'"),
                ));
            };

            let name_id = self.registry.get_or_add_string(name);
            if self.ep_shader_ids.contains_key(&name_id) {
                continue;
            }

            let stage = stage_from_symbol_flags(symbol.flags()).ok_or_else(|| {
                EffectError::parse(format!("shader block '{name}' has no stage"))
            })?;

            self.ep_shader_ids.insert(name_id, INVALID_ID);
            let mut ep = ShaderEntrypoint::new(name, stage);
            ep.symbol_id = overloads[0];
            self.entrypoints.push(ep);
        }

        Ok(())
    }

    /// Emits HLSL and compiles every discovered entrypoint, preserving
    /// discovery order.
    fn compile_entrypoints(&mut self, path: &str, v_id: u32) -> Result<Vec<ShaderVariantDef>> {
        let entrypoints = std::mem::take(&mut self.entrypoints);
        let mut variants = Vec::with_capacity(entrypoints.len());

        for ep in &entrypoints {
            self.hlsl_buf.clear();
            let mut hlsl = std::mem::take(&mut self.hlsl_buf);
            self.generator.get_shader_source(
                &self.scope,
                self.analyzer.blocks(),
                self.analyzer.source(),
                ep,
                &entrypoints,
                &mut hlsl,
            );

            let input = CompileInput {
                source: &hlsl,
                path,
                stage: ep.stage,
                entry_point: &ep.name,
                feature_level: &self.platform.feature_level,
                debug: self.debug,
            };
            let shader_id = register_shader(self.backend.as_mut(), &input, &mut self.registry)?;
            self.hlsl_buf = hlsl;

            let name_id = self.registry.shader(shader_id).name_id;
            self.ep_shader_ids.insert(name_id, shader_id);
            variants.push(ShaderVariantDef {
                shader_id,
                variant_id: v_id,
            });
        }

        self.entrypoints = entrypoints;
        Ok(variants)
    }

    /// Walks technique symbols, validating pass structure and collecting
    /// pass/shader ordering.
    fn collect_effects(&mut self) -> Result<()> {
        struct Technique {
            name: String,
            scope_id: u32,
            err_block: u32,
            defaulted: bool,
            explicit: Vec<(u32, String)>,
        }

        // gather technique structure first; pass registration mutates self
        let mut techniques = Vec::new();

        for symbol_id in 0..self.scope.symbol_count() as u32 {
            let symbol = self.scope.symbol(symbol_id);
            if !symbol.is_scope() || !symbol.has_flags(SymbolTypes::TECHNIQUE_DEF) {
                continue;
            }

            let effect_scope = symbol.scope().expect("technique declares a scope");
            let mut tech = Technique {
                name: symbol.name().to_string(),
                scope_id: effect_scope.id(),
                err_block: symbol.ident().block_start(),
                defaulted: false,
                explicit: Vec::new(),
            };

            for child in effect_scope.children() {
                if child.has_flags(SymbolTypes::TECHNIQUE_SHADER_DECL) {
                    tech.defaulted = true;
                }

                if child.has_flags(SymbolTypes::TECHNIQUE_PASS_DECL) {
                    if tech.defaulted {
                        return Err(self.analyzer.syntax_error(
                            tech.err_block as usize,
                            format!(
                                "illegal use of defaulted and explicit passes in the same \
                                 effect '{}'",
                                tech.name
                            ),
                        ));
                    }
                    let pass_scope = child.scope().expect("pass declares a scope");
                    tech.explicit.push((pass_scope.id(), child.name().to_string()));
                }
            }

            techniques.push(tech);
        }

        for tech in techniques {
            let name_id = self.registry.get_or_add_string(&tech.name);
            let pass_start = self.effect_passes.len();

            let pass_count = if tech.defaulted {
                self.add_pass(tech.scope_id, DEFAULTED_PASS_NAME)?;
                1
            } else {
                for (scope_id, pass_name) in &tech.explicit {
                    self.add_pass(*scope_id, pass_name)?;
                }
                tech.explicit.len()
            };

            self.effect_blocks.push(EffectBlock {
                name_id,
                pass_start,
                pass_count,
            });
        }

        Ok(())
    }

    /// Collects the shaders of one pass scope by name, in author order.
    fn add_pass(&mut self, pass_scope: u32, name: &str) -> Result<()> {
        // pass names are interned so serialized libraries retain them
        self.registry.get_or_add_string(name);
        let shader_start = self.effect_shaders.len();

        let scope = self.scope.scope(pass_scope);
        for child in scope.children() {
            if !child.has_flags(SymbolTypes::TECHNIQUE_SHADER_DECL) {
                continue;
            }

            let shader_name = child.name();
            let string_id = self.registry.get_or_add_string(shader_name);

            let shader_id = self.ep_shader_ids.get(&string_id).copied();
            let Some(shader_id) = shader_id.filter(|&id| id != INVALID_ID) else {
                return Err(self.analyzer.syntax_error(
                    child.ident().block_start() as usize,
                    format!("unrecognized shader name '{shader_name}' declared in effect pass"),
                ));
            };

            self.effect_shaders.push(shader_id);
        }

        self.effect_passes.push(PassBlock {
            shader_start,
            shader_count: self.effect_shaders.len() - shader_start,
        });
        Ok(())
    }

    /// Registers collected effects as deduplicated pass and shader ID groups.
    fn build_effect_defs(&mut self, v_id: u32) -> Result<Vec<EffectVariantDef>> {
        let mut effects = Vec::with_capacity(self.effect_blocks.len());

        for block in &self.effect_blocks {
            let mut pass_ids = self.registry.tmp_id_buffer();

            for pass in &self.effect_passes[block.pass_start..block.pass_start + block.pass_count] {
                let mut shader_ids = self.registry.tmp_id_buffer();
                shader_ids.extend_from_slice(
                    &self.effect_shaders
                        [pass.shader_start..pass.shader_start + pass.shader_count],
                );
                pass_ids.push(self.registry.get_or_add_id_group(&shader_ids));
            }

            let effect = EffectDef {
                name_id: block.name_id,
                pass_group_id: self.registry.get_or_add_id_group(&pass_ids),
            };

            effects.push(EffectVariantDef {
                effect_id: self.registry.get_or_add_effect(effect),
                variant_id: v_id,
            });
        }

        Ok(effects)
    }

    /// Finalizes the library definition, merging deferred cache hits.
    pub fn get_definition(&mut self) -> Result<ShaderLibDef> {
        if !self.cache_hits.is_empty() {
            let cache_repo_count = self
                .cache
                .as_ref()
                .map(|c| c.map.repos().len())
                .unwrap_or(0);

            if self.cache_hits.len() == cache_repo_count && self.repos.is_empty() {
                info!("no changes detected; reusing shader cache");
                self.cache_hits.clear();
                self.stats.cached_repo_count = cache_repo_count as u32;
                let cache = self.cache.as_ref().expect("cache present");
                return Ok(cache.map.definition());
            }

            self.merge_cache_hits();
            info!(
                shaders = self.stats.cached_shader_count,
                effects = self.stats.cached_effect_count,
                "reused cached definitions"
            );
        }

        Ok(ShaderLibDef {
            name: self.name.clone(),
            platform: self.platform.clone(),
            repos: self.repos.clone(),
            registry: self.registry.get_definition(),
            strings: self.registry.string_table(),
        })
    }

    /// Clones deferred cache-hit repos into the current build, remapping
    /// every string and registry ID and repacking variant IDs under the new
    /// repo indices.
    fn merge_cache_hits(&mut self) {
        let Some(cache) = self.cache.take() else {
            return;
        };

        let new_repo_count = self.repos.len() as u32;
        let new_shader_count = self.registry.shader_count();
        let new_effect_count = self.registry.effect_count();
        let new_resource_count = self.registry.resource_count();

        for &cached_index in &self.cache_hits {
            let repo_index = self.repos.len() as u32;
            let mut repo = cache.map.repos()[cached_index].clone();

            for flag_id in &mut repo.config_table.flag_ids {
                let name = cache.map.registry().string(*flag_id);
                *flag_id = self.registry.get_or_add_string(name);
            }
            for mode_id in &mut repo.config_table.mode_ids {
                let name = cache.map.registry().string(*mode_id);
                *mode_id = self.registry.get_or_add_string(name);
            }

            for variant in &mut repo.variants {
                for shader in &mut variant.shaders {
                    shader.shader_id =
                        copy_shader(&cache.map, shader.shader_id, &mut self.registry);
                    shader.variant_id =
                        variant_id(repo_index, crate::data::config_index(shader.variant_id));
                }

                for effect in &mut variant.effects {
                    effect.effect_id =
                        copy_effect(&cache.map, effect.effect_id, &mut self.registry);
                    effect.variant_id =
                        variant_id(repo_index, crate::data::config_index(effect.variant_id));
                }
            }

            self.repos.push(repo);
        }

        self.cache_hits.clear();
        self.stats.cached_repo_count = self.repos.len() as u32 - new_repo_count;
        self.stats.cached_shader_count = self.registry.shader_count() - new_shader_count;
        self.stats.cached_effect_count = self.registry.effect_count() - new_effect_count;
        self.stats.cached_resource_count = self.registry.resource_count() - new_resource_count;
    }

    /// Resets all per-build state.
    pub fn clear(&mut self) {
        self.clear_variant();
        self.preproc.clear();
        self.registry.clear();
        self.repos.clear();
        self.name.clear();

        for slot in &mut self.ring {
            slot.text.clear();
            slot.config_id = 0;
        }
        self.ring_index = 0;

        self.cache = None;
        self.cache_hits.clear();
        self.stats = CacheStats::default();
    }
}

/// Re-adds one cached shader (bytecode, layouts, cbuffers, resources) to the
/// target registry and returns its new ID.
fn copy_shader(cache: &ShaderLibMap, shader_id: u32, registry: &mut ShaderRegistryBuilder) -> u32 {
    let map = cache.registry();
    let def = *map.shader(shader_id);

    let remap_io = |registry: &mut ShaderRegistryBuilder, layout_id: Option<u32>| {
        layout_id.map(|id| {
            let mut ids = registry.tmp_id_buffer();
            for &element_id in map.id_group(id) {
                let mut element = *map.io_element(element_id);
                element.semantic_id =
                    registry.get_or_add_string(map.string(element.semantic_id));
                ids.push(registry.get_or_add_io_element(element));
            }
            registry.get_or_add_id_group(&ids)
        })
    };

    let res_layout_id = def.res_layout_id.map(|id| {
        let mut ids = registry.tmp_id_buffer();
        for &res_id in map.id_group(id) {
            let mut res = *map.resource(res_id);
            res.string_id = registry.get_or_add_string(map.string(res.string_id));
            ids.push(registry.get_or_add_resource(res));
        }
        registry.get_or_add_id_group(&ids)
    });

    let cbuf_group_id = def.cbuf_group_id.map(|id| {
        let mut group_ids = registry.tmp_id_buffer();
        for &cbuf_id in map.id_group(id) {
            let mut cbuf = *map.const_buf(cbuf_id);
            let mut const_ids = registry.tmp_id_buffer();

            for &const_id in map.id_group(cbuf.layout_id) {
                let mut constant = *map.constant(const_id);
                constant.string_id =
                    registry.get_or_add_string(map.string(constant.string_id));
                const_ids.push(registry.get_or_add_constant(constant));
            }

            cbuf.layout_id = registry.get_or_add_id_group(&const_ids);
            cbuf.string_id = registry.get_or_add_string(map.string(cbuf.string_id));
            group_ids.push(registry.get_or_add_const_buf(cbuf));
        }
        registry.get_or_add_id_group(&group_ids)
    });

    let new_def = crate::data::ShaderDef {
        file_id: registry.get_or_add_string(map.string(def.file_id)),
        byte_code_id: registry.get_or_add_byte_code(map.byte_code(def.byte_code_id)),
        name_id: registry.get_or_add_string(map.string(def.name_id)),
        stage: def.stage,
        thread_group_size: def.thread_group_size,
        in_layout_id: remap_io(registry, def.in_layout_id),
        out_layout_id: remap_io(registry, def.out_layout_id),
        res_layout_id,
        cbuf_group_id,
    };

    registry.get_or_add_shader(new_def)
}

/// Re-adds one cached effect and its pass groups to the target registry.
fn copy_effect(cache: &ShaderLibMap, effect_id: u32, registry: &mut ShaderRegistryBuilder) -> u32 {
    let map = cache.registry();
    let def = *map.effect(effect_id);

    let mut pass_ids = registry.tmp_id_buffer();
    for &pass_id in map.id_group(def.pass_group_id) {
        let mut shader_ids = registry.tmp_id_buffer();
        for &shader_id in map.id_group(pass_id) {
            shader_ids.push(copy_shader(cache, shader_id, registry));
        }
        pass_ids.push(registry.get_or_add_id_group(&shader_ids));
    }

    let new_def = EffectDef {
        name_id: registry.get_or_add_string(map.string(def.name_id)),
        pass_group_id: registry.get_or_add_id_group(&pass_ids),
    };

    registry.get_or_add_effect(new_def)
}
