//! Compile/reflect backend contract.
//!
//! The backend turns generated HLSL into GPU bytecode plus reflection
//! metadata. Implementations are external (the CLI ships an FXC-based one on
//! Windows; tests use a deterministic fake); this module owns the contract
//! types and the mapping of reflection output into deduplicated registry
//! entries.

use crate::data::{ConstBufDef, ConstDef, IOElementDef, ResourceDef, ShadeStage, ShaderDef};
use crate::error::{EffectError, Result};
use crate::registry::ShaderRegistryBuilder;
use crate::shader_types::ShaderTypes;

/// One compile request.
#[derive(Debug, Clone, Copy)]
pub struct CompileInput<'a> {
    pub source: &'a str,
    /// Path reported in diagnostics.
    pub path: &'a str,
    pub stage: ShadeStage,
    pub entry_point: &'a str,
    /// Shader-model feature level, e.g. `5_0`.
    pub feature_level: &'a str,
    pub debug: bool,
}

/// D3D-style resource view dimension reported by reflection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceDimension {
    Unknown,
    Buffer,
    Texture1D,
    Texture1DArray,
    Texture2D,
    Texture2DArray,
    Texture3D,
    TextureCube,
    TextureCubeArray,
}

/// D3D-style binding kind reported by reflection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    ConstBuffer,
    TextureView,
    Sampler,
    UavRwTyped,
    Structured,
    UavRwStructured,
    ByteAddress,
    UavRwByteAddress,
    Other,
}

/// One element of an input or output signature.
#[derive(Debug, Clone)]
pub struct IOParam {
    pub semantic_name: String,
    pub semantic_index: u32,
    /// Register component type tag, backend-defined.
    pub component_type: u32,
    /// Component usage mask, one bit per active component.
    pub mask: u8,
}

#[derive(Debug, Clone)]
pub struct ConstReflection {
    pub name: String,
    pub offset: u32,
    pub size: u32,
}

#[derive(Debug, Clone)]
pub struct ConstBufReflection {
    pub name: String,
    pub size: u32,
    pub variables: Vec<ConstReflection>,
}

#[derive(Debug, Clone)]
pub struct ResourceReflection {
    pub name: String,
    pub kind: BindingKind,
    pub dimension: ResourceDimension,
    pub slot: u32,
}

/// Reflection metadata for one compiled shader.
#[derive(Debug, Clone, Default)]
pub struct ShaderReflection {
    pub inputs: Vec<IOParam>,
    pub outputs: Vec<IOParam>,
    pub constant_buffers: Vec<ConstBufReflection>,
    pub resources: Vec<ResourceReflection>,
    /// Only meaningful for compute stages.
    pub thread_group_size: (u32, u32, u32),
}

impl Default for ResourceDimension {
    fn default() -> Self {
        ResourceDimension::Unknown
    }
}

/// Backend output: opaque bytecode plus reflection.
#[derive(Debug, Clone)]
pub struct CompiledShader {
    pub byte_code: Vec<u8>,
    pub reflection: ShaderReflection,
}

/// Compiles HLSL to bytecode and reflects resource metadata. Synchronous and
/// not assumed reentrant; the builder holds the backend for the duration of a
/// build.
pub trait ShaderBackend {
    /// Toolchain identifier recorded in [`crate::data::PlatformDef`].
    fn version(&self) -> String;

    fn compile(&mut self, input: &CompileInput<'_>) -> Result<CompiledShader>;
}

/// Translates a D3D-style binding description into the portable
/// [`ShaderTypes`] bitset.
pub fn resource_type_flags(kind: BindingKind, dimension: ResourceDimension) -> ShaderTypes {
    let mut flags = match dimension {
        ResourceDimension::Unknown => ShaderTypes::empty(),
        ResourceDimension::Buffer => ShaderTypes::BUFFER,
        ResourceDimension::Texture1D => ShaderTypes::TEXTURE_1D,
        ResourceDimension::Texture1DArray => ShaderTypes::TEXTURE_1D_ARRAY,
        ResourceDimension::Texture2D => ShaderTypes::TEXTURE_2D,
        ResourceDimension::Texture2DArray => ShaderTypes::TEXTURE_2D_ARRAY,
        ResourceDimension::Texture3D => ShaderTypes::TEXTURE_3D,
        ResourceDimension::TextureCube => ShaderTypes::TEXTURE_CUBE,
        ResourceDimension::TextureCubeArray => ShaderTypes::TEXTURE_CUBE_ARRAY,
    };

    match kind {
        BindingKind::ConstBuffer => flags |= ShaderTypes::CONST_BUF,
        BindingKind::Sampler => flags |= ShaderTypes::SAMPLER,
        BindingKind::UavRwTyped => flags |= ShaderTypes::RANDOM_RW,
        BindingKind::Structured => flags |= ShaderTypes::STRUCTURED | ShaderTypes::BUFFER,
        BindingKind::UavRwStructured => {
            flags |= ShaderTypes::RANDOM_RW | ShaderTypes::STRUCTURED | ShaderTypes::BUFFER
        }
        BindingKind::ByteAddress => flags |= ShaderTypes::BYTE_ADDRESS | ShaderTypes::BUFFER,
        BindingKind::UavRwByteAddress => {
            flags |= ShaderTypes::RANDOM_RW | ShaderTypes::BYTE_ADDRESS | ShaderTypes::BUFFER
        }
        BindingKind::TextureView | BindingKind::Other => {}
    }

    flags
}

fn component_count(mask: u8) -> u32 {
    (mask & 0xF).count_ones()
}

fn add_io_element(param: &IOParam, registry: &mut ShaderRegistryBuilder) -> u32 {
    let count = component_count(param.mask);
    let element = IOElementDef {
        semantic_id: registry.get_or_add_string(&param.semantic_name),
        semantic_index: param.semantic_index,
        data_type: param.component_type,
        component_count: count,
        // 4-byte / 32-bit components
        size: count * 4,
    };
    registry.get_or_add_io_element(element)
}

fn add_io_layout(params: &[IOParam], registry: &mut ShaderRegistryBuilder) -> Option<u32> {
    if params.is_empty() {
        return None;
    }

    let mut ids = registry.tmp_id_buffer();
    for param in params {
        ids.push(add_io_element(param, registry));
    }
    Some(registry.get_or_add_id_group(&ids))
}

fn add_constant_buffers(
    cbufs: &[ConstBufReflection],
    registry: &mut ShaderRegistryBuilder,
) -> Option<u32> {
    if cbufs.is_empty() {
        return None;
    }

    let mut group_ids = registry.tmp_id_buffer();

    for cbuf in cbufs {
        let mut const_ids = registry.tmp_id_buffer();

        for var in &cbuf.variables {
            let def = ConstDef {
                string_id: registry.get_or_add_string(&var.name),
                offset: var.offset,
                size: var.size,
            };
            const_ids.push(registry.get_or_add_constant(def));
        }

        let layout_id = registry.get_or_add_id_group(&const_ids);
        let def = ConstBufDef {
            string_id: registry.get_or_add_string(&cbuf.name),
            size: cbuf.size,
            layout_id,
        };
        group_ids.push(registry.get_or_add_const_buf(def));
    }

    Some(registry.get_or_add_id_group(&group_ids))
}

fn add_resources(
    resources: &[ResourceReflection],
    registry: &mut ShaderRegistryBuilder,
) -> Option<u32> {
    // constant buffers are bound resources too, but carried separately
    let filtered: Vec<&ResourceReflection> = resources
        .iter()
        .filter(|r| r.kind != BindingKind::ConstBuffer)
        .collect();

    if filtered.is_empty() {
        return None;
    }

    let mut ids = registry.tmp_id_buffer();
    for res in filtered {
        let def = ResourceDef {
            string_id: registry.get_or_add_string(&res.name),
            kind: resource_type_flags(res.kind, res.dimension),
            slot: res.slot,
        };
        ids.push(registry.get_or_add_resource(def));
    }
    Some(registry.get_or_add_id_group(&ids))
}

/// Compiles one entrypoint through the backend and registers the bytecode and
/// reflected metadata, returning the deduplicated shader ID.
pub fn register_shader(
    backend: &mut dyn ShaderBackend,
    input: &CompileInput<'_>,
    registry: &mut ShaderRegistryBuilder,
) -> Result<u32> {
    let compiled = backend
        .compile(input)
        .map_err(|err| match err {
            EffectError::Backend(_) => err,
            other => EffectError::backend(other.to_string()),
        })?;

    let reflection = &compiled.reflection;
    let thread_group_size = if input.stage == ShadeStage::Compute {
        reflection.thread_group_size
    } else {
        (0, 0, 0)
    };

    let def = ShaderDef {
        file_id: registry.get_or_add_string(input.path),
        byte_code_id: registry.get_or_add_byte_code(&compiled.byte_code),
        name_id: registry.get_or_add_string(input.entry_point),
        stage: input.stage,
        thread_group_size,
        in_layout_id: add_io_layout(&reflection.inputs, registry),
        out_layout_id: add_io_layout(&reflection.outputs, registry),
        res_layout_id: add_resources(&reflection.resources, registry),
        cbuf_group_id: add_constant_buffers(&reflection.constant_buffers, registry),
    };

    Ok(registry.get_or_add_shader(def))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedBackend(CompiledShader);

    impl ShaderBackend for FixedBackend {
        fn version(&self) -> String {
            "fixed-1.0".to_string()
        }

        fn compile(&mut self, _input: &CompileInput<'_>) -> Result<CompiledShader> {
            Ok(self.0.clone())
        }
    }

    fn input(stage: ShadeStage) -> CompileInput<'static> {
        CompileInput {
            source: "void main() {}",
            path: "fx/test.wfx",
            stage,
            entry_point: "main",
            feature_level: "5_0",
            debug: false,
        }
    }

    #[test]
    fn resource_flag_translation() {
        let flags = resource_type_flags(BindingKind::UavRwStructured, ResourceDimension::Buffer);
        assert!(flags.contains(ShaderTypes::RW_STRUCTURED_BUFFER));

        let flags = resource_type_flags(BindingKind::TextureView, ResourceDimension::TextureCube);
        assert!(flags.contains(ShaderTypes::TEXTURE_CUBE));

        let flags = resource_type_flags(BindingKind::Sampler, ResourceDimension::Unknown);
        assert!(flags.contains(ShaderTypes::SAMPLER));
    }

    #[test]
    fn reflection_maps_into_registry() {
        let compiled = CompiledShader {
            byte_code: b"DXBC-fake".to_vec(),
            reflection: ShaderReflection {
                inputs: vec![IOParam {
                    semantic_name: "POSITION".to_string(),
                    semantic_index: 0,
                    component_type: 3,
                    mask: 0b0111,
                }],
                outputs: vec![IOParam {
                    semantic_name: "SV_Position".to_string(),
                    semantic_index: 0,
                    component_type: 3,
                    mask: 0b1111,
                }],
                constant_buffers: vec![ConstBufReflection {
                    name: "_EffectGlobals".to_string(),
                    size: 32,
                    variables: vec![
                        ConstReflection { name: "gTint".to_string(), offset: 0, size: 16 },
                        ConstReflection { name: "gFade".to_string(), offset: 16, size: 4 },
                    ],
                }],
                resources: vec![
                    ResourceReflection {
                        name: "gTex".to_string(),
                        kind: BindingKind::TextureView,
                        dimension: ResourceDimension::Texture2D,
                        slot: 0,
                    },
                    ResourceReflection {
                        name: "_EffectGlobals".to_string(),
                        kind: BindingKind::ConstBuffer,
                        dimension: ResourceDimension::Unknown,
                        slot: 0,
                    },
                ],
                thread_group_size: (0, 0, 0),
            },
        };

        let mut backend = FixedBackend(compiled);
        let mut registry = ShaderRegistryBuilder::new();
        let id = register_shader(&mut backend, &input(ShadeStage::Vertex), &mut registry).unwrap();

        let def = *registry.shader(id);
        assert!(def.in_layout_id.is_some());
        assert!(def.out_layout_id.is_some());
        assert!(def.cbuf_group_id.is_some());
        // the cbuffer itself is excluded from the resource group
        assert!(def.res_layout_id.is_some());
        assert_eq!(registry.resource_count(), 1);

        let in_count = component_count(0b0111);
        assert_eq!(in_count, 3);

        // identical compile result deduplicates to the same shader ID
        let id2 = register_shader(&mut backend, &input(ShadeStage::Vertex), &mut registry).unwrap();
        assert_eq!(id, id2);
    }

    #[test]
    fn compute_keeps_thread_group_size() {
        let compiled = CompiledShader {
            byte_code: b"DXBC-cs".to_vec(),
            reflection: ShaderReflection {
                thread_group_size: (8, 8, 1),
                ..Default::default()
            },
        };
        let mut backend = FixedBackend(compiled);
        let mut registry = ShaderRegistryBuilder::new();
        let id = register_shader(&mut backend, &input(ShadeStage::Compute), &mut registry).unwrap();
        assert_eq!(registry.shader(id).thread_group_size, (8, 8, 1));
    }
}
