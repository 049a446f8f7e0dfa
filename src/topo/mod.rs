//! 拓扑构建模块
//!
//! 直线拓扑（多跳测试的主力）与 TOSSIM 风格的 `.topo` 文件加载。

pub mod line;
pub mod topo_file;
