//! 资源加载
//!
//! 渲染核心之外的协作者：着色器编译、OBJ 模型与材质、纹理解码。
//! 文件缺失统一报告为带工作目录提示的 `AssetError::FileNotFound`。

pub mod model;
pub mod shader;
pub mod texture;
