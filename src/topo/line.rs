//! 直线拓扑构建

use crate::net::{LinkOpts, MoteConfig, NetWorld, NodeId};

/// 直线拓扑配置选项
#[derive(Debug, Clone)]
pub struct LineOpts {
    pub motes: u16,
    /// 第一个 mote 的编号；后续编号依次加一
    pub first_id: u16,
    pub link: LinkOpts,
    pub mote: MoteConfig,
}

impl Default for LineOpts {
    fn default() -> Self {
        Self {
            motes: 3,
            first_id: 1,
            link: LinkOpts::default(),
            mote: MoteConfig::default(),
        }
    }
}

/// 构建直线拓扑
///
/// 拓扑结构：m1 <-> m2 <-> ... <-> mN，相邻 mote 之间双向链路。
/// 返回：按顺序排列的 mote 编号
pub fn build_line(world: &mut NetWorld, opts: &LineOpts) -> Vec<NodeId> {
    let ids: Vec<NodeId> = (0..opts.motes)
        .map(|i| NodeId(opts.first_id.saturating_add(i)))
        .collect();
    for &id in &ids {
        if let Err(err) = world.net.add_mote(id, opts.mote.clone()) {
            tracing::warn!(%err, "跳过重复的 mote");
        }
    }
    for pair in ids.windows(2) {
        world.net.connect_bidi(pair[0], pair[1], &opts.link);
    }
    ids
}
