//! End-to-end library builds over a deterministic in-test backend.

use std::cell::Cell;
use std::rc::Rc;

use pretty_assertions::assert_eq;

use wfx_effects::backend::{CompileInput, CompiledShader, ShaderBackend, ShaderReflection};
use wfx_effects::builder::ShaderLibBuilder;
use wfx_effects::data::{config_index, repo_index, variant_id, ShadeStage};
use wfx_effects::error::Result;
use wfx_effects::libmap::ShaderLibMap;
use wfx_effects::preprocessor::DEFAULT_MODE_MACRO;
use wfx_effects::serialize::{read_cache_archive, write_cache_archive};

/// Produces fake bytecode derived from the generated source and synthesizes
/// a thread-group size from any `numthreads` attribute it finds.
struct TestBackend {
    compile_count: Rc<Cell<usize>>,
}

impl TestBackend {
    fn new() -> (Box<dyn ShaderBackend>, Rc<Cell<usize>>) {
        let count = Rc::new(Cell::new(0));
        (
            Box::new(TestBackend {
                compile_count: count.clone(),
            }),
            count,
        )
    }
}

fn parse_numthreads(source: &str) -> (u32, u32, u32) {
    let Some(at) = source.find("numthreads") else {
        return (0, 0, 0);
    };
    let rest = &source[at..];
    let Some(open) = rest.find('(') else {
        return (0, 0, 0);
    };
    let Some(close) = rest.find(')') else {
        return (0, 0, 0);
    };

    let mut dims = rest[open + 1..close]
        .split(',')
        .map(|part| part.trim().parse::<u32>().unwrap_or(0));
    (
        dims.next().unwrap_or(0),
        dims.next().unwrap_or(0),
        dims.next().unwrap_or(0),
    )
}

impl ShaderBackend for TestBackend {
    fn version(&self) -> String {
        "test-backend-1.0".to_string()
    }

    fn compile(&mut self, input: &CompileInput<'_>) -> Result<CompiledShader> {
        self.compile_count.set(self.compile_count.get() + 1);

        let byte_code = format!(
            "DXBC|{:?}|{}|{:08x}",
            input.stage,
            input.entry_point,
            crc32fast::hash(input.source.as_bytes())
        )
        .into_bytes();

        Ok(CompiledShader {
            byte_code,
            reflection: ShaderReflection {
                thread_group_size: parse_numthreads(input.source),
                ..Default::default()
            },
        })
    }
}

fn build_library(name: &str, repos: &[(&str, &str)]) -> (wfx_effects::ShaderLibDef, usize) {
    let (backend, count) = TestBackend::new();
    let mut builder = ShaderLibBuilder::new(backend);
    builder.set_name(name);
    for (path, source) in repos {
        builder.add_repo(path, source, None).unwrap();
    }
    let def = builder.get_definition().unwrap();
    (def, count.get())
}

#[test]
fn empty_repo_minimum() {
    let (def, compiles) = build_library("empty", &[("empty.wfx", "// no shaders\n")]);

    assert_eq!(compiles, 0);
    assert_eq!(def.repos.len(), 1);

    let repo = &def.repos[0];
    assert_eq!(repo.variants.len(), 1);
    assert!(repo.variants[0].shaders.is_empty());
    assert!(repo.variants[0].effects.is_empty());
    assert!(repo.config_table.flag_ids.is_empty());
    assert_eq!(repo.config_table.mode_ids.len(), 1);
    assert_eq!(repo.config_table.config_count(), 1);

    // the single mode is the implicit default
    let map = ShaderLibMap::new(def);
    let mode_name_id = map.registry().try_string_id(DEFAULT_MODE_MACRO).unwrap();
    assert_eq!(map.repos()[0].config_table.mode_ids[0], mode_name_id);
}

#[test]
fn single_compute_shader() {
    let src = "\
[numthreads(8, 8, 1)]
[compute]
void CS_Main(uint3 id : SV_DispatchThreadID) { }
";
    let (def, compiles) = build_library("compute", &[("cs.wfx", src)]);
    assert_eq!(compiles, 1);

    let map = ShaderLibMap::new(def);
    let name_id = map.registry().try_string_id("CS_Main").unwrap();
    let shader_id = map.try_shader_id(name_id, 0).expect("shader present");
    let shader = map.shader(shader_id);

    assert_eq!(shader.stage(), ShadeStage::Compute);
    assert_eq!(shader.thread_group_size(), (8, 8, 1));
    assert_eq!(shader.name(), "CS_Main");
    assert_eq!(map.repos()[0].variants[0].shaders[0].variant_id, 0);
    assert!(map.defines(0).is_empty());
}

#[test]
fn flag_fan_out_collapses_identical_variants() {
    let src = "\
#pragma flags FEATURE_A FEATURE_B
[vertex]
void VS_Main() { }
[pixel]
void PS_Main() { }
";
    let (def, compiles) = build_library("flags", &[("flags.wfx", src)]);

    // 4 configs, but all preprocess to identical text: one config compiled
    assert_eq!(compiles, 2);

    let repo = &def.repos[0];
    assert_eq!(repo.config_table.flag_ids.len(), 2);
    assert_eq!(repo.config_table.flag_combinations(), 4);
    assert_eq!(repo.config_table.mode_count(), 1);
    assert_eq!(repo.variants.len(), 4);

    // duplicate variants match the first, with only variant IDs rewritten
    for (config, variant) in repo.variants.iter().enumerate() {
        assert_eq!(variant.shaders.len(), 2);
        for (i, pair) in variant.shaders.iter().enumerate() {
            assert_eq!(pair.shader_id, repo.variants[0].shaders[i].shader_id);
            assert_eq!(pair.variant_id, variant_id(0, config as u32));
        }
    }

    let map = ShaderLibMap::new(def);
    let feature_b = map.registry().try_string_id("FEATURE_B").unwrap();
    let v = variant_id(0, 0b10);
    assert!(map.is_defined(feature_b, v));
    assert!(!map.is_defined(feature_b, variant_id(0, 0b01)));

    // flag round trip through the map API
    let set = map.set_flag(feature_b, true, variant_id(0, 0));
    assert_eq!(config_index(set), 0b10);
    assert!(map.is_defined(feature_b, set));
    let cleared = map.set_flag(feature_b, false, set);
    assert_eq!(config_index(cleared), 0);
}

#[test]
fn mode_variants_differ() {
    let src = "\
#pragma modes HIGH_Q
#pragma pixel PS_Main
#ifdef HIGH_Q
float4 PS_Main() : SV_Target { return 1; }
#else
float4 PS_Main() : SV_Target { return 0; }
#endif
";
    let (def, compiles) = build_library("modes", &[("modes.wfx", src)]);

    // default + HIGH_Q, different text in each
    assert_eq!(compiles, 2);
    let repo = &def.repos[0];
    assert_eq!(repo.variants.len(), 2);

    let s0 = repo.variants[0].shaders[0].shader_id;
    let s1 = repo.variants[1].shaders[0].shader_id;
    assert_ne!(s0, s1, "different mode bodies must compile differently");
}

#[test]
fn effect_with_two_passes() {
    let src = "\
#pragma vertex VS_Main
#pragma pixel PS_Main PS_Alt
void VS_Main() { }
float4 PS_Main() : SV_Target { return 0; }
float4 PS_Alt() : SV_Target { return 1; }
technique T {
  pass A {
    vertex VS_Main;
    pixel PS_Main;
  }
  pass B {
    vertex VS_Main;
    pixel PS_Alt;
  }
}
";
    let (def, _) = build_library("fx", &[("fx.wfx", src)]);
    let map = ShaderLibMap::new(def);

    let t = map.registry().try_string_id("T").unwrap();
    let effect_id = map.try_effect_id(t, 0).expect("effect present");
    let effect = map.effect(effect_id);

    assert_eq!(effect.name(), "T");
    assert_eq!(effect.pass_count(), 2);
    assert_eq!(effect.shader_count(0), 2);
    assert_eq!(effect.shader_count(1), 2);

    assert_eq!(effect.shader(0, 0).name(), "VS_Main");
    assert_eq!(effect.shader(0, 1).name(), "PS_Main");
    assert_eq!(effect.shader(1, 0).name(), "VS_Main");
    assert_eq!(effect.shader(1, 1).name(), "PS_Alt");

    // both passes share the same vertex shader ID
    assert_eq!(effect.pass(0)[0], effect.pass(1)[0]);
}

#[test]
fn defaulted_pass_synthesis() {
    let src = "\
#pragma vertex VS_Main
#pragma pixel PS_Main
void VS_Main() { }
float4 PS_Main() : SV_Target { return 0; }
technique Simple {
  vertex VS_Main;
  pixel PS_Main;
}
";
    let (def, _) = build_library("fx", &[("fx.wfx", src)]);
    let map = ShaderLibMap::new(def);

    let name = map.registry().try_string_id("Simple").unwrap();
    let effect = map.effect(map.try_effect_id(name, 0).unwrap());
    assert_eq!(effect.pass_count(), 1);
    assert_eq!(effect.shader_count(0), 2);
    assert_eq!(effect.shader(0, 0).name(), "VS_Main");
    assert_eq!(effect.shader(0, 1).name(), "PS_Main");
}

#[test]
fn defaulted_and_explicit_passes_conflict() {
    let src = "\
#pragma vertex VS_Main
void VS_Main() { }
technique Broken {
  vertex VS_Main;
  pass X {
    vertex VS_Main;
  }
}
";
    let (backend, _) = TestBackend::new();
    let mut builder = ShaderLibBuilder::new(backend);
    builder.set_name("bad");
    let err = builder.add_repo("bad.wfx", src, None).unwrap_err();
    let msg = err.to_string();
    assert!(
        msg.contains("defaulted and explicit passes"),
        "unexpected error: {msg}"
    );
}

#[test]
fn unterminated_scope_aborts_repo() {
    let src = "#pragma vertex VS_Main\nvoid VS_Main() {\n  int x;\n";
    let (backend, count) = TestBackend::new();
    let mut builder = ShaderLibBuilder::new(backend);
    builder.set_name("broken");

    let err = builder.add_repo("broken.wfx", src, None).unwrap_err();
    assert!(
        err.to_string().contains("Unterminated scope '{' starting on line 2"),
        "unexpected error: {err}"
    );
    assert_eq!(count.get(), 0);
}

#[test]
fn unknown_pass_shader_is_an_error() {
    let src = "\
#pragma vertex VS_Main
void VS_Main() { }
technique T {
  pass P {
    vertex VS_Missing;
  }
}
";
    let (backend, _) = TestBackend::new();
    let mut builder = ShaderLibBuilder::new(backend);
    let err = builder.add_repo("t.wfx", src, None).unwrap_err();
    assert!(err.to_string().contains("VS_Missing"), "{err}");
}

#[test]
fn pragma_entrypoint_without_definition_is_an_error() {
    let src = "#pragma pixel PS_Ghost\nfloat4 NotIt() : SV_Target { return 0; }\n";
    let (backend, _) = TestBackend::new();
    let mut builder = ShaderLibBuilder::new(backend);
    let err = builder.add_repo("t.wfx", src, None).unwrap_err();
    assert!(err.to_string().contains("PS_Ghost"), "{err}");
}

#[test]
fn globals_reach_the_backend_as_cbuffer() {
    // captured generated source must contain the synthesized cbuffer
    struct CapturingBackend {
        seen: Rc<std::cell::RefCell<Vec<String>>>,
    }

    impl ShaderBackend for CapturingBackend {
        fn version(&self) -> String {
            "capture-1.0".to_string()
        }

        fn compile(&mut self, input: &CompileInput<'_>) -> Result<CompiledShader> {
            self.seen.borrow_mut().push(input.source.to_string());
            Ok(CompiledShader {
                byte_code: vec![1, 2, 3],
                reflection: ShaderReflection::default(),
            })
        }
    }

    let seen = Rc::new(std::cell::RefCell::new(Vec::new()));
    let mut builder = ShaderLibBuilder::new(Box::new(CapturingBackend { seen: seen.clone() }));

    let src = "\
#pragma pixel PS_Main
float4 gTint;
float4 PS_Main() : SV_Target { return gTint; }
";
    builder.add_repo("g.wfx", src, None).unwrap();

    let sources = seen.borrow();
    assert_eq!(sources.len(), 1);
    assert!(sources[0].contains("cbuffer _EffectGlobals"), "{}", sources[0]);
    assert!(!sources[0].contains("#pragma pixel"), "{}", sources[0]);
}

#[test]
fn serialization_round_trip_preserves_lookups() {
    let src = "\
#pragma flags FANCY
#pragma pixel PS_Main
float4 PS_Main() : SV_Target { return 0; }
";
    let (def, _) = build_library("roundtrip", &[("rt.wfx", src)]);

    let framed = write_cache_archive(&def, 6);
    let restored = read_cache_archive(&framed).unwrap();
    assert_eq!(def, restored);

    let map = ShaderLibMap::new(restored);
    let name_id = map.registry().try_string_id("PS_Main").unwrap();
    assert!(map.try_shader_id(name_id, 0).is_some());
    assert_eq!(map.try_default_shader_variant(name_id), Some(0));

    let fancy = map.registry().try_string_id("FANCY").unwrap();
    let v = map.set_flag(fancy, true, 0);
    assert_eq!(config_index(v), 1);
    assert_eq!(config_index(map.reset_variant(v)), 0);
}

#[test]
fn cache_hit_skips_backend_compiles() {
    let src = "\
#pragma pixel PS_Main
float4 PS_Main() : SV_Target { return 0; }
";

    // first build, serialized as the cache would be on disk
    let (first_def, first_compiles) = build_library("cached", &[("foo.wfx", src)]);
    assert_eq!(first_compiles, 1);
    let cache_bytes = write_cache_archive(&first_def, 6);

    // second build against the cache: no backend calls
    let (backend, count) = TestBackend::new();
    let mut builder = ShaderLibBuilder::new(backend);
    builder.set_name("cached");
    builder.set_cache(read_cache_archive(&cache_bytes).unwrap());
    builder.add_repo("foo.wfx", src, None).unwrap();

    let def = builder.get_definition().unwrap();
    assert_eq!(count.get(), 0);
    assert_eq!(builder.cache_stats().cached_repo_count, 1);
    assert_eq!(def.repos[0], first_def.repos[0]);
    assert_eq!(def.registry, first_def.registry);
}

#[test]
fn changed_source_misses_cache() {
    let src_a = "#pragma pixel PS\nfloat4 PS() : SV_Target { return 0; }\n";
    let src_b = "#pragma pixel PS\nfloat4 PS() : SV_Target { return 1; }\n";

    let (def_a, _) = build_library("lib", &[("a.wfx", src_a)]);
    let cache_bytes = write_cache_archive(&def_a, 6);

    let (backend, count) = TestBackend::new();
    let mut builder = ShaderLibBuilder::new(backend);
    builder.set_name("lib");
    builder.set_cache(read_cache_archive(&cache_bytes).unwrap());
    builder.add_repo("a.wfx", src_b, None).unwrap();
    builder.get_definition().unwrap();

    assert_eq!(count.get(), 1, "changed source must recompile");
}

#[test]
fn partial_cache_merge_remaps_ids() {
    let src_a = "#pragma pixel PS_A\nfloat4 PS_A() : SV_Target { return 0; }\n";
    let src_b = "#pragma pixel PS_B\nfloat4 PS_B() : SV_Target { return 1; }\n";

    let (def_a, _) = build_library("lib", &[("a.wfx", src_a)]);
    let cache_bytes = write_cache_archive(&def_a, 6);

    // new build processes b.wfx fresh and reuses a.wfx from cache
    let (backend, count) = TestBackend::new();
    let mut builder = ShaderLibBuilder::new(backend);
    builder.set_name("lib");
    builder.set_cache(read_cache_archive(&cache_bytes).unwrap());
    builder.add_repo("b.wfx", src_b, None).unwrap();
    builder.add_repo("a.wfx", src_a, None).unwrap();

    let def = builder.get_definition().unwrap();
    assert_eq!(count.get(), 1, "only b.wfx compiles");
    assert_eq!(builder.cache_stats().cached_repo_count, 1);
    assert_eq!(builder.cache_stats().cached_shader_count, 1);
    assert_eq!(def.repos.len(), 2);

    // merged repo keeps its path and repacked variant IDs
    let merged = &def.repos[1];
    assert_eq!(merged.path, "a.wfx");
    let pair = &merged.variants[0].shaders[0];
    assert_eq!(repo_index(pair.variant_id), 1);
    assert_eq!(config_index(pair.variant_id), 0);

    // remapped shader resolves by name through the map
    let map = ShaderLibMap::new(def);
    let ps_a = map.registry().try_string_id("PS_A").unwrap();
    let shader_id = map.try_shader_id(ps_a, variant_id(1, 0)).unwrap();
    assert_eq!(map.shader(shader_id).name(), "PS_A");
}

#[test]
fn multiple_repos_share_registry_entries() {
    let src = "#pragma pixel PS\nfloat4 PS() : SV_Target { return 0; }\n";

    // identical sources in two repos: the bytecode blob deduplicates even
    // though the shader defs differ by source path
    let (def, compiles) = build_library("dedup", &[("a.wfx", src), ("b.wfx", src)]);
    assert_eq!(compiles, 2);
    assert_eq!(def.repos.len(), 2);
    assert_eq!(def.registry.byte_code.len(), 1);
    assert_eq!(def.registry.shaders.len(), 2);

    let a = def.repos[0].variants[0].shaders[0];
    let b = def.repos[1].variants[0].shaders[0];
    assert_eq!(
        def.registry.shaders[a.shader_id as usize].byte_code_id,
        def.registry.shaders[b.shader_id as usize].byte_code_id
    );
    assert_eq!(repo_index(a.variant_id), 0);
    assert_eq!(repo_index(b.variant_id), 1);
}
