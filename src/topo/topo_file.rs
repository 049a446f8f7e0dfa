//! TOSSIM `.topo` 文件
//!
//! 每行 `src dst gain`，表示一条 `src -> dst` 的单向链路；`#` 开头为注释，空行忽略。
//! gain（dBm）只作记录，链路质量由 [`LinkOpts`] 决定。

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::net::{LinkOpts, MoteConfig, NetWorld, NodeId};

#[derive(Debug, Error)]
pub enum TopoError {
    #[error("failed to read topology file: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: {msg}")]
    Parse { line: usize, msg: String },
}

/// 一条拓扑边
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TopoEdge {
    pub from: NodeId,
    pub to: NodeId,
    pub gain: f64,
}

/// 解析拓扑文本
pub fn parse_topo(text: &str) -> Result<Vec<TopoEdge>, TopoError> {
    let mut edges = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let content = raw.split('#').next().unwrap_or("").trim();
        if content.is_empty() {
            continue;
        }
        let fields: Vec<&str> = content.split_whitespace().collect();
        let [from, to, gain] = fields.as_slice() else {
            return Err(TopoError::Parse {
                line,
                msg: format!("expected `src dst gain`, got {} fields", fields.len()),
            });
        };
        let id = |s: &str| {
            s.parse::<u16>().map(NodeId).map_err(|e| TopoError::Parse {
                line,
                msg: format!("bad mote id `{s}`: {e}"),
            })
        };
        let gain = gain.parse::<f64>().map_err(|e| TopoError::Parse {
            line,
            msg: format!("bad gain `{gain}`: {e}"),
        })?;
        edges.push(TopoEdge {
            from: id(*from)?,
            to: id(*to)?,
            gain,
        });
    }
    Ok(edges)
}

/// 按拓扑边建 mote 与链路，返回出现过的 mote 编号
pub fn build_from_edges(
    world: &mut NetWorld,
    edges: &[TopoEdge],
    link: &LinkOpts,
    mote: &MoteConfig,
) -> Vec<NodeId> {
    let ids: BTreeSet<NodeId> = edges.iter().flat_map(|e| [e.from, e.to]).collect();
    for &id in &ids {
        if world.net.mote(id).is_none() {
            if let Err(err) = world.net.add_mote(id, mote.clone()) {
                tracing::warn!(%err, "跳过重复的 mote");
            }
        }
    }
    for e in edges {
        world.net.connect(e.from, e.to, link);
    }
    tracing::info!(motes = ids.len(), links = edges.len(), "📐 拓扑已加载");
    ids.into_iter().collect()
}

/// 读取并构建 `.topo` 文件
pub fn load_topo(
    world: &mut NetWorld,
    path: &Path,
    link: &LinkOpts,
    mote: &MoteConfig,
) -> Result<Vec<NodeId>, TopoError> {
    let text = fs::read_to_string(path)?;
    let edges = parse_topo(&text)?;
    Ok(build_from_edges(world, &edges, link, mote))
}
