//! 适配器与特性等级选择
//!
//! 设备创建分两步：按“高性能优先”顺序枚举适配器，取第一块非软件适配器；
//! 再按降序尝试候选特性等级，第一个成功的等级即为设备的特性等级。
//! 两步都与具体 API 无关，DX12 后端和软件后端共用这里的逻辑。

use std::fmt;

use tracing::{debug, info};

use crate::core::error::{GraphicsError, Result};

/// 设备特性等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FeatureLevel {
    Level12_0,
    Level12_1,
    Level12_2,
}

/// 降序排列的候选特性等级
pub const FEATURE_LEVEL_CANDIDATES: [FeatureLevel; 3] = [
    FeatureLevel::Level12_2,
    FeatureLevel::Level12_1,
    FeatureLevel::Level12_0,
];

impl fmt::Display for FeatureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FeatureLevel::Level12_0 => "12.0",
            FeatureLevel::Level12_1 => "12.1",
            FeatureLevel::Level12_2 => "12.2",
        };
        f.write_str(s)
    }
}

/// 适配器信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    pub name: String,
    pub dedicated_video_memory: u64,
    pub is_software: bool,
}

/// 在按性能降序排列的适配器列表中选出第一块硬件适配器
pub fn select_adapter(adapters: &[AdapterInfo]) -> Option<usize> {
    let index = adapters.iter().position(|a| !a.is_software)?;
    info!(
        adapter = %adapters[index].name,
        vram_mb = adapters[index].dedicated_video_memory / (1024 * 1024),
        "Use Adapter"
    );
    Some(index)
}

/// 依次尝试候选特性等级，返回第一个创建成功的设备
///
/// `create` 返回 `None` 表示该等级不被支持。
pub fn create_with_feature_level<D, F>(mut create: F) -> Result<(D, FeatureLevel)>
where
    F: FnMut(FeatureLevel) -> Option<D>,
{
    for level in FEATURE_LEVEL_CANDIDATES {
        if let Some(device) = create(level) {
            info!(feature_level = %level, "Device created");
            return Ok((device, level));
        }
        debug!(feature_level = %level, "Feature level not supported");
    }

    Err(GraphicsError::DeviceCreation(
        "No candidate feature level is supported by the selected adapter".to_string(),
    )
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(name: &str, is_software: bool) -> AdapterInfo {
        AdapterInfo {
            name: name.to_string(),
            dedicated_video_memory: 0,
            is_software,
        }
    }

    #[test]
    fn test_skips_software_adapters() {
        let adapters = [adapter("WARP", true), adapter("GPU", false), adapter("iGPU", false)];
        assert_eq!(select_adapter(&adapters), Some(1));
    }

    #[test]
    fn test_no_hardware_adapter() {
        assert_eq!(select_adapter(&[adapter("WARP", true)]), None);
        assert_eq!(select_adapter(&[]), None);
    }

    #[test]
    fn test_feature_levels_tried_in_descending_order() {
        let mut tried = Vec::new();
        let (device, level) = create_with_feature_level(|level| {
            tried.push(level);
            (level == FeatureLevel::Level12_0).then_some("device")
        })
        .unwrap();

        assert_eq!(device, "device");
        assert_eq!(level, FeatureLevel::Level12_0);
        assert_eq!(tried, FEATURE_LEVEL_CANDIDATES.to_vec());
    }

    #[test]
    fn test_no_feature_level_is_an_error() {
        let result = create_with_feature_level(|_| None::<()>);
        assert!(matches!(
            result,
            Err(crate::core::LucentError::Graphics(GraphicsError::DeviceCreation(_)))
        ));
    }
}
