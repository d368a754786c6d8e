//! 根签名与图形管线状态对象

use std::ffi::CString;
use std::mem::ManuallyDrop;

use windows::core::PCSTR;
use windows::Win32::Graphics::Direct3D::ID3DBlob;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::DXGI_SAMPLE_DESC;

use crate::core::error::{GraphicsError, Result};
use crate::gfx::types::{
    CompareFunction, CullMode, GraphicsPipelineDescriptor, RootParameter, RootSignatureDescriptor, ShaderVisibility,
};

use super::conv;

#[derive(Debug)]
pub struct Dx12RootSignature {
    pub(super) raw: ID3D12RootSignature,
}

#[derive(Debug)]
pub struct Dx12PipelineState {
    pub(super) raw: ID3D12PipelineState,
}

fn visibility(visibility: ShaderVisibility) -> D3D12_SHADER_VISIBILITY {
    match visibility {
        ShaderVisibility::All => D3D12_SHADER_VISIBILITY_ALL,
        ShaderVisibility::Vertex => D3D12_SHADER_VISIBILITY_VERTEX,
        ShaderVisibility::Pixel => D3D12_SHADER_VISIBILITY_PIXEL,
    }
}

fn cull_mode(mode: CullMode) -> D3D12_CULL_MODE {
    match mode {
        CullMode::None => D3D12_CULL_MODE_NONE,
        CullMode::Front => D3D12_CULL_MODE_FRONT,
        CullMode::Back => D3D12_CULL_MODE_BACK,
    }
}

fn compare_function(func: CompareFunction) -> D3D12_COMPARISON_FUNC {
    match func {
        CompareFunction::Less => D3D12_COMPARISON_FUNC_LESS,
        CompareFunction::LessEqual => D3D12_COMPARISON_FUNC_LESS_EQUAL,
        CompareFunction::Always => D3D12_COMPARISON_FUNC_ALWAYS,
    }
}

fn blob_message(blob: &ID3DBlob) -> String {
    let bytes = unsafe { std::slice::from_raw_parts(blob.GetBufferPointer().cast::<u8>(), blob.GetBufferSize()) };
    String::from_utf8_lossy(bytes).trim_end_matches('\0').to_string()
}

pub fn create_root_signature(device: &ID3D12Device, desc: &RootSignatureDescriptor) -> Result<Dx12RootSignature> {
    // 每个描述符表只有一个区间，区间数组必须和参数数组同样长寿
    let ranges: Vec<D3D12_DESCRIPTOR_RANGE> = desc
        .parameters
        .iter()
        .map(|param| match *param {
            RootParameter::ShaderResourceTable { base_register, count, .. } => D3D12_DESCRIPTOR_RANGE {
                RangeType: D3D12_DESCRIPTOR_RANGE_TYPE_SRV,
                NumDescriptors: count,
                BaseShaderRegister: base_register,
                RegisterSpace: 0,
                OffsetInDescriptorsFromTableStart: D3D12_DESCRIPTOR_RANGE_OFFSET_APPEND,
            },
            RootParameter::ConstantBufferView { .. } => D3D12_DESCRIPTOR_RANGE::default(),
        })
        .collect();

    let parameters: Vec<D3D12_ROOT_PARAMETER> = desc
        .parameters
        .iter()
        .zip(&ranges)
        .map(|(param, range)| match *param {
            RootParameter::ConstantBufferView { register, visibility: v } => D3D12_ROOT_PARAMETER {
                ParameterType: D3D12_ROOT_PARAMETER_TYPE_CBV,
                Anonymous: D3D12_ROOT_PARAMETER_0 {
                    Descriptor: D3D12_ROOT_DESCRIPTOR { ShaderRegister: register, RegisterSpace: 0 },
                },
                ShaderVisibility: visibility(v),
            },
            RootParameter::ShaderResourceTable { visibility: v, .. } => D3D12_ROOT_PARAMETER {
                ParameterType: D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE,
                Anonymous: D3D12_ROOT_PARAMETER_0 {
                    DescriptorTable: D3D12_ROOT_DESCRIPTOR_TABLE {
                        NumDescriptorRanges: 1,
                        pDescriptorRanges: range,
                    },
                },
                ShaderVisibility: visibility(v),
            },
        })
        .collect();

    let samplers: Vec<D3D12_STATIC_SAMPLER_DESC> = desc
        .static_samplers
        .iter()
        .map(|sampler| D3D12_STATIC_SAMPLER_DESC {
            Filter: D3D12_FILTER_MIN_MAG_MIP_LINEAR,
            AddressU: D3D12_TEXTURE_ADDRESS_MODE_WRAP,
            AddressV: D3D12_TEXTURE_ADDRESS_MODE_WRAP,
            AddressW: D3D12_TEXTURE_ADDRESS_MODE_WRAP,
            ComparisonFunc: D3D12_COMPARISON_FUNC_NEVER,
            MaxLOD: D3D12_FLOAT32_MAX,
            ShaderRegister: sampler.register,
            ShaderVisibility: visibility(sampler.visibility),
            ..Default::default()
        })
        .collect();

    let root_desc = D3D12_ROOT_SIGNATURE_DESC {
        NumParameters: parameters.len() as u32,
        pParameters: parameters.as_ptr(),
        NumStaticSamplers: samplers.len() as u32,
        pStaticSamplers: samplers.as_ptr(),
        Flags: D3D12_ROOT_SIGNATURE_FLAG_ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT,
    };

    let mut signature: Option<ID3DBlob> = None;
    let mut errors: Option<ID3DBlob> = None;
    let serialized = unsafe {
        D3D12SerializeRootSignature(&root_desc, D3D_ROOT_SIGNATURE_VERSION_1, &mut signature, Some(&mut errors))
    };
    if let Err(e) = serialized {
        let message = errors.as_ref().map(blob_message).unwrap_or_else(|| e.to_string());
        return Err(GraphicsError::ResourceCreation(format!(
            "Failed to serialize root signature '{}': {}",
            desc.name, message
        ))
        .into());
    }
    let signature = signature.ok_or_else(|| {
        GraphicsError::ResourceCreation(format!("Root signature '{}' serialized to nothing", desc.name))
    })?;

    let raw: ID3D12RootSignature = unsafe {
        let bytes = std::slice::from_raw_parts(signature.GetBufferPointer().cast::<u8>(), signature.GetBufferSize());
        device.CreateRootSignature(0, bytes)
    }
    .map_err(conv::map_err("Failed to create root signature", GraphicsError::ResourceCreation))?;

    Ok(Dx12RootSignature { raw })
}

pub fn create_graphics_pipeline(
    device: &ID3D12Device,
    desc: &GraphicsPipelineDescriptor<'_, Dx12RootSignature>,
) -> Result<Dx12PipelineState> {
    let semantics = desc
        .input_layout
        .iter()
        .map(|e| {
            CString::new(e.semantic).map_err(|_| {
                GraphicsError::ResourceCreation(format!("Invalid input semantic '{}'", e.semantic))
            })
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let elements: Vec<D3D12_INPUT_ELEMENT_DESC> = desc
        .input_layout
        .iter()
        .zip(&semantics)
        .map(|(e, name)| D3D12_INPUT_ELEMENT_DESC {
            SemanticName: PCSTR::from_raw(name.as_ptr().cast()),
            SemanticIndex: e.semantic_index,
            Format: conv::format(e.format),
            InputSlot: 0,
            AlignedByteOffset: e.offset,
            InputSlotClass: D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA,
            InstanceDataStepRate: 0,
        })
        .collect();

    let mut blend = D3D12_BLEND_DESC::default();
    blend.RenderTarget[0].RenderTargetWriteMask = D3D12_COLOR_WRITE_ENABLE_ALL.0 as u8;

    let mut pso_desc = D3D12_GRAPHICS_PIPELINE_STATE_DESC {
        pRootSignature: ManuallyDrop::new(Some(desc.root_signature.raw.clone())),
        VS: D3D12_SHADER_BYTECODE {
            pShaderBytecode: desc.vertex_shader.as_ptr().cast(),
            BytecodeLength: desc.vertex_shader.len(),
        },
        PS: D3D12_SHADER_BYTECODE {
            pShaderBytecode: desc.pixel_shader.as_ptr().cast(),
            BytecodeLength: desc.pixel_shader.len(),
        },
        BlendState: blend,
        SampleMask: u32::MAX,
        RasterizerState: D3D12_RASTERIZER_DESC {
            FillMode: D3D12_FILL_MODE_SOLID,
            CullMode: cull_mode(desc.cull_mode),
            DepthClipEnable: true.into(),
            ..Default::default()
        },
        DepthStencilState: D3D12_DEPTH_STENCIL_DESC {
            DepthEnable: true.into(),
            DepthWriteMask: D3D12_DEPTH_WRITE_MASK_ALL,
            DepthFunc: compare_function(desc.depth_compare),
            ..Default::default()
        },
        InputLayout: D3D12_INPUT_LAYOUT_DESC {
            pInputElementDescs: elements.as_ptr(),
            NumElements: elements.len() as u32,
        },
        PrimitiveTopologyType: D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
        NumRenderTargets: 1,
        DSVFormat: conv::format(desc.depth_format),
        SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
        ..Default::default()
    };
    pso_desc.RTVFormats[0] = conv::format(desc.render_target_format);

    let result = unsafe { device.CreateGraphicsPipelineState::<ID3D12PipelineState>(&pso_desc) };
    drop(ManuallyDrop::into_inner(pso_desc.pRootSignature));

    let raw = result.map_err(conv::map_err("Failed to create graphics pipeline state", GraphicsError::ResourceCreation))?;
    Ok(Dx12PipelineState { raw })
}
