//! 桌面层挂载：句柄类型、错误分类、定位器/重挂载器接口。
//!
//! 这里只描述"宿主层存在与否"这件事本身；具体的窗口类名、
//! 0x052C 消息等壳层实现细节全部隔离在 app crate 的 Win32 实现里，
//! 方便按壳层版本替换，也方便测试注入假实现。

pub mod controller;

pub use controller::{AttachmentController, RetryPolicy, TickOutcome};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 壳层壁纸宿主窗口句柄。只借不管：壳层随时可能销毁重建它。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostHandle(pub isize);

/// 挂件自己的原生窗口句柄。进程生命周期内唯一，由控制器持有。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceHandle(pub isize);

/// 挂件窗口相对桌面层的挂载状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentState {
    Detached,
    Attaching,
    Attached,
    Lost,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttachError {
    /// 重试次数耗尽，宿主层始终没有出现。
    #[error("桌面宿主层在 {attempts} 次探测后仍未出现")]
    LayerUnavailable { attempts: u32 },
    /// 原生重挂载调用被拒绝（句柄失效 / 样式修改失败等），带系统错误详情。
    #[error("窗口重挂载失败: {0}")]
    ReparentFailed(String),
    /// 之前有效的宿主句柄中途失效（Explorer 重启）。
    #[error("桌面壳已重启，宿主句柄失效")]
    ShellRestarted,
}

/// 定位壳层的壁纸宿主窗口。
///
/// `probe` 是单次探测（含"促使壳层创建宿主层"的副作用），不含重试；
/// 重试节奏由 [`AttachmentController`] 的 tick 驱动，保证不阻塞调用线程。
pub trait ShellLayerLocator {
    /// 探测一次宿主层，找到则返回句柄。
    fn probe(&mut self) -> Option<HostHandle>;

    /// 宿主句柄当前是否仍然有效。
    fn host_valid(&self, host: HostHandle) -> bool;
}

/// 把挂件窗口挂进宿主层 / 从宿主层摘出来。
pub trait WindowReparenter {
    /// 剥离窗口边框样式、SetParent 到宿主、重新定位置底。
    /// 已挂载时重复调用必须安全（幂等，覆盖托盘"重新挂载"场景）。
    fn attach(&mut self, surface: SurfaceHandle, host: HostHandle) -> Result<(), AttachError>;

    /// 恢复成普通顶层窗口（宿主层找不到时的降级路径）。
    fn detach(&mut self, surface: SurfaceHandle) -> Result<(), AttachError>;
}
