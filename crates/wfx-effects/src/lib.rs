//! Shader effect compiler core.
//!
//! Compiles a shader-effect dialect of HLSL into a deployable,
//! content-addressed shader library. For a family of input repositories,
//! every statically declared variant of every shader and effect is
//! preprocessed, translated to plain HLSL, compiled through a pluggable
//! backend, reflected, and deduplicated into a registry keyed by variant
//! IDs.
//!
//! The pipeline per repository:
//!
//! 1. [`preprocessor::VariantPreprocessor`] expands one configuration of the
//!    source and collects pragma-declared flags, modes and entrypoints.
//! 2. [`parser::BlockAnalyzer`] partitions the expanded source into
//!    depth-annotated lex blocks.
//! 3. [`parser::SymbolParser`] pattern-matches declarations into token,
//!    symbol and scope tables.
//! 4. [`generator::ShaderGenerator`] re-emits HLSL per entrypoint with
//!    effect-framework constructs masked out.
//! 5. A [`backend::ShaderBackend`] compiles and reflects each entrypoint and
//!    the results land, deduplicated, in the
//!    [`registry::ShaderRegistryBuilder`].
//!
//! [`builder::ShaderLibBuilder`] orchestrates the above over variants and
//! repositories with incremental cache reuse; [`libmap::ShaderLibMap`] is the
//! immutable read side used at runtime.

pub mod backend;
pub mod builder;
pub mod config;
pub mod data;
pub mod error;
pub mod generator;
pub mod libmap;
pub mod parser;
pub mod preprocessor;
pub mod registry;
pub mod serialize;
pub mod shader_types;
pub mod strings;

pub use backend::{CompileInput, CompiledShader, ShaderBackend, ShaderReflection};
pub use builder::{CacheStats, ShaderLibBuilder};
pub use config::ConfigIdTable;
pub use data::{
    config_index, repo_index, variant_id, PlatformDef, PlatformTarget, ShadeStage, ShaderLibDef,
    StringId, INVALID_ID,
};
pub use error::{CacheError, EffectError, Result};
pub use libmap::ShaderLibMap;
pub use preprocessor::{IncludeHandler, ResolvedInclude, ShaderEntrypoint, VariantPreprocessor};
pub use registry::{ShaderRegistryBuilder, ShaderRegistryMap};
pub use serialize::{read_cache_archive, write_cache_archive, ZlibArchive};
pub use strings::StringRegistry;
