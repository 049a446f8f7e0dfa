//! 网络模块
//!
//! mote 网络的网络层与链路层：包格式、距离向量路由、转发/洪泛、邻居发现，
//! 以及承载多个 mote 的仿真链路。

// 子模块声明
mod command;
mod deliver_frame;
pub mod forwarding;
mod id;
pub mod impair;
mod link;
mod mote;
pub mod neighbor;
mod net_world;
mod network;
mod network_viz;
pub mod packet;
pub mod routing;
mod stats;
mod tick;

// 重新导出公共接口
pub use command::{Command, CommandEvent};
pub use deliver_frame::DeliverFrame;
pub use forwarding::{DedupCache, DropReason, Forwarder, Verdict};
pub use id::{LinkId, NodeId};
pub use impair::Impairment;
pub use link::{Link, LinkOpts};
pub use mote::{Mote, MoteConfig};
pub use neighbor::NeighborTable;
pub use net_world::NetWorld;
pub use network::{LinkDest, LinkError, Network};
pub use packet::{FrameError, Packet, Protocol};
pub use routing::{DvRouter, RouteEntry, RouterOpts};
pub use stats::{MoteStats, Stats};
pub use tick::MoteTick;
