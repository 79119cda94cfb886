//! 格式映射

use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use crate::core::error::{GraphicsError, Result};
use crate::renderer::command::QueueType;
use crate::renderer::resource::TextureFormat;

pub fn dxgi_format(format: TextureFormat) -> DXGI_FORMAT {
    match format {
        TextureFormat::Rgba8Unorm => DXGI_FORMAT_R8G8B8A8_UNORM,
        TextureFormat::Rgba8UnormSrgb => DXGI_FORMAT_R8G8B8A8_UNORM_SRGB,
        TextureFormat::Bgra8Unorm => DXGI_FORMAT_B8G8R8A8_UNORM,
        TextureFormat::Rgba16Float => DXGI_FORMAT_R16G16B16A16_FLOAT,
        TextureFormat::Rgba32Float => DXGI_FORMAT_R32G32B32A32_FLOAT,
        TextureFormat::R32Float => DXGI_FORMAT_R32_FLOAT,
        TextureFormat::R11G11B10Float => DXGI_FORMAT_R11G11B10_FLOAT,
        TextureFormat::D24UnormS8Uint => DXGI_FORMAT_D24_UNORM_S8_UINT,
        TextureFormat::D32Float => DXGI_FORMAT_D32_FLOAT,
    }
}

/// 索引缓冲格式，只支持 16 位和 32 位索引
pub fn index_format(stride: u64) -> Result<DXGI_FORMAT> {
    match stride {
        2 => Ok(DXGI_FORMAT_R16_UINT),
        4 => Ok(DXGI_FORMAT_R32_UINT),
        _ => Err(GraphicsError::ResourceCreation(format!(
            "index stride must be 2 or 4 bytes, got {}",
            stride
        ))
        .into()),
    }
}

pub fn command_list_type(queue: QueueType) -> D3D12_COMMAND_LIST_TYPE {
    match queue {
        QueueType::Direct => D3D12_COMMAND_LIST_TYPE_DIRECT,
        QueueType::Compute => D3D12_COMMAND_LIST_TYPE_COMPUTE,
        QueueType::Copy => D3D12_COMMAND_LIST_TYPE_COPY,
    }
}
