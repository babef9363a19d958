//! FXC (`D3DCompile`/`D3DReflect`) backend. Windows only.
#![cfg(target_os = "windows")]

use std::ffi::{c_void, CString};

use wfx_effects::backend::{
    BindingKind, CompileInput, CompiledShader, ConstBufReflection, ConstReflection, IOParam,
    ResourceDimension, ResourceReflection, ShaderBackend, ShaderReflection,
};
use wfx_effects::data::ShadeStage;
use wfx_effects::error::{EffectError, Result};

use windows::core::{Interface, PCSTR};
use windows::Win32::Graphics::Direct3D::Fxc::{
    D3DCompile, D3DReflect, D3DCOMPILE_DEBUG, D3DCOMPILE_ENABLE_STRICTNESS,
    D3DCOMPILE_OPTIMIZATION_LEVEL3,
};
use windows::Win32::Graphics::Direct3D::{
    ID3DBlob, D3D_SIT_CBUFFER, D3D_SIT_SAMPLER, D3D_SIT_STRUCTURED, D3D_SIT_UAV_RWBYTEADDRESS,
    D3D_SIT_UAV_RWSTRUCTURED, D3D_SIT_UAV_RWTYPED, D3D_SRV_DIMENSION_BUFFER,
    D3D_SRV_DIMENSION_BUFFEREX, D3D_SRV_DIMENSION_TEXTURE1D, D3D_SRV_DIMENSION_TEXTURE1DARRAY,
    D3D_SRV_DIMENSION_TEXTURE2D, D3D_SRV_DIMENSION_TEXTURE2DARRAY, D3D_SRV_DIMENSION_TEXTURE3D,
    D3D_SRV_DIMENSION_TEXTURECUBE, D3D_SRV_DIMENSION_TEXTURECUBEARRAY,
};
use windows::Win32::Graphics::Direct3D11::{
    ID3D11ShaderReflection, D3D11_SHADER_BUFFER_DESC, D3D11_SHADER_DESC,
    D3D11_SHADER_INPUT_BIND_DESC, D3D11_SHADER_VARIABLE_DESC, D3D11_SIGNATURE_PARAMETER_DESC,
};

/// Compiles generated HLSL through the legacy FXC toolchain, targeting
/// Shader Model 5.x.
#[derive(Default)]
pub struct FxcBackend;

impl FxcBackend {
    pub fn new() -> Self {
        FxcBackend
    }
}

fn target_string(stage: ShadeStage, feature_level: &str) -> String {
    format!("{}{}", stage.target_prefix(), feature_level)
}

fn blob_bytes(blob: &ID3DBlob) -> Vec<u8> {
    unsafe {
        let ptr = blob.GetBufferPointer() as *const u8;
        let len = blob.GetBufferSize();
        std::slice::from_raw_parts(ptr, len).to_vec()
    }
}

fn pcstr_to_string(value: PCSTR) -> String {
    if value.is_null() {
        return String::new();
    }
    unsafe { value.to_string().unwrap_or_default() }
}

fn binding_kind(desc: &D3D11_SHADER_INPUT_BIND_DESC) -> BindingKind {
    match desc.Type {
        t if t == D3D_SIT_CBUFFER => BindingKind::ConstBuffer,
        t if t == D3D_SIT_SAMPLER => BindingKind::Sampler,
        t if t == D3D_SIT_UAV_RWTYPED => BindingKind::UavRwTyped,
        t if t == D3D_SIT_STRUCTURED => BindingKind::Structured,
        t if t == D3D_SIT_UAV_RWSTRUCTURED => BindingKind::UavRwStructured,
        t if t == D3D_SIT_UAV_RWBYTEADDRESS => BindingKind::UavRwByteAddress,
        _ => BindingKind::TextureView,
    }
}

fn binding_dimension(desc: &D3D11_SHADER_INPUT_BIND_DESC) -> ResourceDimension {
    match desc.Dimension {
        d if d == D3D_SRV_DIMENSION_BUFFER || d == D3D_SRV_DIMENSION_BUFFEREX => {
            ResourceDimension::Buffer
        }
        d if d == D3D_SRV_DIMENSION_TEXTURE1D => ResourceDimension::Texture1D,
        d if d == D3D_SRV_DIMENSION_TEXTURE1DARRAY => ResourceDimension::Texture1DArray,
        d if d == D3D_SRV_DIMENSION_TEXTURE2D => ResourceDimension::Texture2D,
        d if d == D3D_SRV_DIMENSION_TEXTURE2DARRAY => ResourceDimension::Texture2DArray,
        d if d == D3D_SRV_DIMENSION_TEXTURE3D => ResourceDimension::Texture3D,
        d if d == D3D_SRV_DIMENSION_TEXTURECUBE => ResourceDimension::TextureCube,
        d if d == D3D_SRV_DIMENSION_TEXTURECUBEARRAY => ResourceDimension::TextureCubeArray,
        _ => ResourceDimension::Unknown,
    }
}

fn io_param(desc: &D3D11_SIGNATURE_PARAMETER_DESC) -> IOParam {
    IOParam {
        semantic_name: pcstr_to_string(desc.SemanticName),
        semantic_index: desc.SemanticIndex,
        component_type: desc.ComponentType.0 as u32,
        mask: desc.Mask,
    }
}

fn reflect(byte_code: &[u8], stage: ShadeStage) -> Result<ShaderReflection> {
    let map_err = |e: windows::core::Error| EffectError::backend(format!("D3DReflect: {e}"));

    unsafe {
        let mut raw: *mut c_void = std::ptr::null_mut();
        D3DReflect(
            byte_code.as_ptr() as *const c_void,
            byte_code.len(),
            &ID3D11ShaderReflection::IID,
            &mut raw,
        )
        .map_err(map_err)?;
        let reflector = ID3D11ShaderReflection::from_raw(raw);

        let mut desc = D3D11_SHADER_DESC::default();
        reflector.GetDesc(&mut desc).map_err(map_err)?;

        let mut reflection = ShaderReflection::default();

        for i in 0..desc.InputParameters {
            let mut param = D3D11_SIGNATURE_PARAMETER_DESC::default();
            reflector
                .GetInputParameterDesc(i, &mut param)
                .map_err(map_err)?;
            reflection.inputs.push(io_param(&param));
        }

        for i in 0..desc.OutputParameters {
            let mut param = D3D11_SIGNATURE_PARAMETER_DESC::default();
            reflector
                .GetOutputParameterDesc(i, &mut param)
                .map_err(map_err)?;
            reflection.outputs.push(io_param(&param));
        }

        for i in 0..desc.ConstantBuffers {
            let cbuf = reflector.GetConstantBufferByIndex(i);
            let mut cbuf_desc = D3D11_SHADER_BUFFER_DESC::default();
            cbuf.GetDesc(&mut cbuf_desc).map_err(map_err)?;

            let mut variables = Vec::with_capacity(cbuf_desc.Variables as usize);
            for j in 0..cbuf_desc.Variables {
                let var = cbuf.GetVariableByIndex(j);
                let mut var_desc = D3D11_SHADER_VARIABLE_DESC::default();
                var.GetDesc(&mut var_desc).map_err(map_err)?;
                variables.push(ConstReflection {
                    name: pcstr_to_string(var_desc.Name),
                    offset: var_desc.StartOffset,
                    size: var_desc.Size,
                });
            }

            reflection.constant_buffers.push(ConstBufReflection {
                name: pcstr_to_string(cbuf_desc.Name),
                size: cbuf_desc.Size,
                variables,
            });
        }

        for i in 0..desc.BoundResources {
            let mut bind = D3D11_SHADER_INPUT_BIND_DESC::default();
            reflector
                .GetResourceBindingDesc(i, &mut bind)
                .map_err(map_err)?;
            reflection.resources.push(ResourceReflection {
                name: pcstr_to_string(bind.Name),
                kind: binding_kind(&bind),
                dimension: binding_dimension(&bind),
                slot: bind.BindPoint,
            });
        }

        if stage == ShadeStage::Compute {
            let mut x = 0u32;
            let mut y = 0u32;
            let mut z = 0u32;
            reflector.GetThreadGroupSize(Some(&mut x), Some(&mut y), Some(&mut z));
            reflection.thread_group_size = (x, y, z);
        }

        Ok(reflection)
    }
}

impl ShaderBackend for FxcBackend {
    fn version(&self) -> String {
        "d3dcompiler_47".to_string()
    }

    fn compile(&mut self, input: &CompileInput<'_>) -> Result<CompiledShader> {
        let path = CString::new(input.path).unwrap_or_default();
        let entry = CString::new(input.entry_point).unwrap_or_default();
        let target = CString::new(target_string(input.stage, input.feature_level))
            .unwrap_or_default();

        let mut flags = D3DCOMPILE_ENABLE_STRICTNESS;
        if input.debug {
            flags |= D3DCOMPILE_DEBUG;
        } else {
            flags |= D3DCOMPILE_OPTIMIZATION_LEVEL3;
        }

        let mut code: Option<ID3DBlob> = None;
        let mut errors: Option<ID3DBlob> = None;

        let result = unsafe {
            D3DCompile(
                input.source.as_ptr() as *const c_void,
                input.source.len(),
                PCSTR(path.as_ptr() as *const u8),
                None,
                None,
                PCSTR(entry.as_ptr() as *const u8),
                PCSTR(target.as_ptr() as *const u8),
                flags,
                0,
                &mut code,
                Some(&mut errors),
            )
        };

        if let Err(err) = result {
            let diagnostic = errors
                .as_ref()
                .map(|blob| String::from_utf8_lossy(&blob_bytes(blob)).into_owned())
                .unwrap_or_else(|| err.to_string());
            return Err(EffectError::backend(diagnostic));
        }

        let code = code.ok_or_else(|| EffectError::backend("compiler returned no bytecode"))?;
        let byte_code = blob_bytes(&code);
        let reflection = reflect(&byte_code, input.stage)?;

        Ok(CompiledShader {
            byte_code,
            reflection,
        })
    }
}
