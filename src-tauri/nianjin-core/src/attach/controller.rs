//! 挂载状态机：Detached → Attaching → Attached → Lost → Attaching。
//!
//! 定位重试不在这里睡眠：`tick()` 每次只推进一步，调用方按
//! [`RetryPolicy::settle`] 的节奏调度下一次 tick（app 里是 tokio 定时器）。
//! 这样同一台状态机既能挂在异步驱动下跑，也能在测试里同步驱动。

use super::{
    AttachError, AttachmentState, HostHandle, ShellLayerLocator, SurfaceHandle, WindowReparenter,
};
use std::time::Duration;

/// 宿主层探测的重试预算。
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// 一轮挂载序列里最多探测多少次。
    pub max_attempts: u32,
    /// 两次探测之间的建议间隔（交给驱动方调度，状态机本身不等待）。
    pub settle: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        // 12 × 250ms ≈ 3 秒：WorkerW 的创建是异步的，这个窗口在
        // 慢机器 / Explorer 刚重启时也够用了
        Self {
            max_attempts: 12,
            settle: Duration::from_millis(250),
        }
    }
}

/// 一次 tick 的推进结果，驱动方据此决定下一步。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// 当前无事可做（未开始挂载，或已放弃等待外部决策）。
    Idle,
    /// 还在探测宿主层，请在 settle 间隔后再 tick 一次。
    Probing { attempts_left: u32 },
    /// 已挂载且宿主仍有效。
    Attached,
    /// 本轮序列以失败告终（状态已置 Lost），错误同时被记录。
    Failed(AttachError),
}

/// 桌面挂件控制器：持有挂件窗口句柄和唯一一份挂载状态。
///
/// 对定位器/重挂载器泛型化，测试里注入假实现即可覆盖整个状态机。
pub struct AttachmentController<L, R> {
    locator: L,
    reparenter: R,
    surface: SurfaceHandle,
    policy: RetryPolicy,
    state: AttachmentState,
    host: Option<HostHandle>,
    attempts_left: u32,
    last_error: Option<AttachError>,
}

impl<L: ShellLayerLocator, R: WindowReparenter> AttachmentController<L, R> {
    pub fn new(locator: L, reparenter: R, surface: SurfaceHandle, policy: RetryPolicy) -> Self {
        Self {
            locator,
            reparenter,
            surface,
            policy,
            state: AttachmentState::Detached,
            host: None,
            attempts_left: 0,
            last_error: None,
        }
    }

    pub fn state(&self) -> AttachmentState {
        self.state
    }

    pub fn host(&self) -> Option<HostHandle> {
        self.host
    }

    pub fn surface(&self) -> SurfaceHandle {
        self.surface
    }

    pub fn settle(&self) -> Duration {
        self.policy.settle
    }

    pub fn last_error(&self) -> Option<&AttachError> {
        self.last_error.as_ref()
    }

    /// 开始（或强制重新开始）一轮挂载序列。任意状态下可调用：
    /// 已挂载时相当于托盘"重新挂载"，会完整重跑定位 + 重挂载。
    pub fn begin_attach(&mut self) {
        self.state = AttachmentState::Attaching;
        self.attempts_left = self.policy.max_attempts;
        self.last_error = None;
    }

    /// 推进状态机一步。
    ///
    /// - Attaching：探测一次宿主层；找到就重挂载，找不到就扣减预算，
    ///   预算耗尽置 Lost（LayerUnavailable）。
    /// - Attached：校验宿主句柄；失效则置 Lost（ShellRestarted），
    ///   下一次 tick 自动重新开始定位。
    /// - Lost：ShellRestarted / ReparentFailed 自动重试整轮序列；
    ///   LayerUnavailable 留在 Lost，由驱动方决定降级为浮动窗口。
    pub fn tick(&mut self) -> TickOutcome {
        match self.state {
            AttachmentState::Detached => TickOutcome::Idle,
            AttachmentState::Attaching => self.tick_attaching(),
            AttachmentState::Attached => self.tick_attached(),
            AttachmentState::Lost => {
                if matches!(
                    self.last_error,
                    Some(AttachError::LayerUnavailable { .. })
                ) {
                    TickOutcome::Idle
                } else {
                    self.begin_attach();
                    self.tick_attaching()
                }
            }
        }
    }

    fn tick_attaching(&mut self) -> TickOutcome {
        match self.locator.probe() {
            Some(host) => match self.reparenter.attach(self.surface, host) {
                Ok(()) => {
                    self.host = Some(host);
                    self.state = AttachmentState::Attached;
                    self.last_error = None;
                    TickOutcome::Attached
                }
                Err(e) => {
                    // 只有原生调用全部成功才算 Attached；失败必须上报，不能吞掉
                    self.host = None;
                    self.state = AttachmentState::Lost;
                    self.last_error = Some(e.clone());
                    TickOutcome::Failed(e)
                }
            },
            None => {
                self.attempts_left = self.attempts_left.saturating_sub(1);
                if self.attempts_left == 0 {
                    let e = AttachError::LayerUnavailable {
                        attempts: self.policy.max_attempts,
                    };
                    self.state = AttachmentState::Lost;
                    self.last_error = Some(e.clone());
                    TickOutcome::Failed(e)
                } else {
                    TickOutcome::Probing {
                        attempts_left: self.attempts_left,
                    }
                }
            }
        }
    }

    fn tick_attached(&mut self) -> TickOutcome {
        match self.host {
            Some(host) if self.locator.host_valid(host) => TickOutcome::Attached,
            _ => {
                let e = AttachError::ShellRestarted;
                self.host = None;
                self.state = AttachmentState::Lost;
                self.last_error = Some(e.clone());
                TickOutcome::Failed(e)
            }
        }
    }

    /// 降级：把挂件摘回普通顶层窗口（LayerUnavailable 之后的兜底显示）。
    pub fn detach_to_floating(&mut self) -> Result<(), AttachError> {
        self.reparenter.detach(self.surface)?;
        self.host = None;
        self.state = AttachmentState::Detached;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    /// 假定位器：前 `appear_after` 次探测找不到宿主，之后一直返回 `host`。
    /// `valid` 翻转成 false 模拟 Explorer 重启。
    struct FakeLocator {
        appear_after: u32,
        probes: u32,
        host: HostHandle,
        valid: Rc<Cell<bool>>,
    }

    impl FakeLocator {
        fn immediate(host: isize) -> (Self, Rc<Cell<bool>>) {
            Self::delayed(host, 0)
        }

        fn delayed(host: isize, appear_after: u32) -> (Self, Rc<Cell<bool>>) {
            let valid = Rc::new(Cell::new(true));
            (
                Self {
                    appear_after,
                    probes: 0,
                    host: HostHandle(host),
                    valid: Rc::clone(&valid),
                },
                valid,
            )
        }
    }

    impl ShellLayerLocator for FakeLocator {
        fn probe(&mut self) -> Option<HostHandle> {
            self.probes += 1;
            if self.probes > self.appear_after && self.valid.get() {
                Some(self.host)
            } else {
                None
            }
        }

        fn host_valid(&self, host: HostHandle) -> bool {
            self.valid.get() && host == self.host
        }
    }

    /// 假重挂载器：记录 attach 次数；`reject` 为真或句柄非法时报 ReparentFailed。
    #[derive(Default)]
    struct FakeReparenter {
        attach_calls: u32,
        detach_calls: u32,
        reject: bool,
    }

    impl WindowReparenter for FakeReparenter {
        fn attach(&mut self, _surface: SurfaceHandle, host: HostHandle) -> Result<(), AttachError> {
            self.attach_calls += 1;
            if self.reject || host.0 == 0 {
                return Err(AttachError::ReparentFailed("GetLastError=1400".into()));
            }
            Ok(())
        }

        fn detach(&mut self, _surface: SurfaceHandle) -> Result<(), AttachError> {
            self.detach_calls += 1;
            Ok(())
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            settle: Duration::from_millis(0),
        }
    }

    /// 同步驱动一轮序列直到出结果，最多 tick 预算 +1 次（保证测试不悬挂）。
    fn drive(
        c: &mut AttachmentController<FakeLocator, FakeReparenter>,
    ) -> TickOutcome {
        let bound = c.policy.max_attempts + 1;
        let mut last = TickOutcome::Idle;
        for _ in 0..bound {
            last = c.tick();
            match last {
                TickOutcome::Probing { .. } => continue,
                _ => break,
            }
        }
        last
    }

    #[test]
    fn test_attach_twice_is_idempotent() {
        let (locator, _) = FakeLocator::immediate(42);
        let mut c =
            AttachmentController::new(locator, FakeReparenter::default(), SurfaceHandle(7), policy(12));

        c.begin_attach();
        assert_eq!(drive(&mut c), TickOutcome::Attached);
        assert_eq!(c.state(), AttachmentState::Attached);

        // 托盘"重新挂载"：已挂载时重跑整轮，结果仍是 Attached
        c.begin_attach();
        assert_eq!(drive(&mut c), TickOutcome::Attached);
        assert_eq!(c.state(), AttachmentState::Attached);
        assert_eq!(c.host(), Some(HostHandle(42)));
    }

    #[test]
    fn test_shell_restart_recovers_with_fresh_host() {
        let (locator, valid) = FakeLocator::immediate(42);
        let mut c =
            AttachmentController::new(locator, FakeReparenter::default(), SurfaceHandle(7), policy(12));

        c.begin_attach();
        assert_eq!(drive(&mut c), TickOutcome::Attached);

        // 模拟 Explorer 重启：下一次校验必须先转 Lost
        valid.set(false);
        assert_eq!(
            c.tick(),
            TickOutcome::Failed(AttachError::ShellRestarted)
        );
        assert_eq!(c.state(), AttachmentState::Lost);

        // 宿主恢复后，后续 tick 自动重跑定位并重新挂上
        valid.set(true);
        assert_eq!(drive(&mut c), TickOutcome::Attached);
        assert_eq!(c.state(), AttachmentState::Attached);
    }

    #[test]
    fn test_bounded_retry_succeeds_before_budget() {
        // 宿主层第 5 次探测才出现，预算 12 次：应当成功
        let (locator, _) = FakeLocator::delayed(42, 4);
        let mut c =
            AttachmentController::new(locator, FakeReparenter::default(), SurfaceHandle(7), policy(12));

        c.begin_attach();
        assert_eq!(drive(&mut c), TickOutcome::Attached);
    }

    #[test]
    fn test_bounded_retry_gives_up_without_hanging() {
        // 宿主层永远不出现：预算耗尽后报 LayerUnavailable，状态 Lost
        let (locator, _) = FakeLocator::delayed(42, u32::MAX);
        let mut c =
            AttachmentController::new(locator, FakeReparenter::default(), SurfaceHandle(7), policy(6));

        c.begin_attach();
        assert_eq!(
            drive(&mut c),
            TickOutcome::Failed(AttachError::LayerUnavailable { attempts: 6 })
        );
        assert_eq!(c.state(), AttachmentState::Lost);

        // 放弃之后不再自己转圈，等驱动方决定降级
        assert_eq!(c.tick(), TickOutcome::Idle);
        assert_eq!(c.state(), AttachmentState::Lost);
    }

    #[test]
    fn test_manual_refresh_terminates_from_any_state() {
        // 从每个状态出发，强制刷新后有界步数内必然停在 Attached 或 Lost
        for start in [
            AttachmentState::Detached,
            AttachmentState::Attaching,
            AttachmentState::Attached,
            AttachmentState::Lost,
        ] {
            let (locator, valid) = FakeLocator::immediate(42);
            let mut c = AttachmentController::new(
                locator,
                FakeReparenter::default(),
                SurfaceHandle(7),
                policy(4),
            );

            // 把控制器开到目标起始状态
            match start {
                AttachmentState::Detached => {}
                AttachmentState::Attaching => c.begin_attach(),
                AttachmentState::Attached => {
                    c.begin_attach();
                    drive(&mut c);
                }
                AttachmentState::Lost => {
                    c.begin_attach();
                    valid.set(false);
                    drive(&mut c);
                    valid.set(true);
                }
            }

            c.begin_attach();
            let outcome = drive(&mut c);
            assert!(
                matches!(outcome, TickOutcome::Attached | TickOutcome::Failed(_)),
                "refresh from {:?} ended in {:?}",
                start,
                outcome
            );
            assert_ne!(c.state(), AttachmentState::Attaching);
        }
    }

    #[test]
    fn test_invalid_host_reports_reparent_failed() {
        // 句柄 0 被假重挂载器视为无效：必须报 ReparentFailed 且不得变成 Attached
        let (locator, _) = FakeLocator::immediate(0);
        let mut c =
            AttachmentController::new(locator, FakeReparenter::default(), SurfaceHandle(7), policy(3));

        c.begin_attach();
        match drive(&mut c) {
            TickOutcome::Failed(AttachError::ReparentFailed(msg)) => {
                assert!(msg.contains("1400"));
            }
            other => panic!("expected ReparentFailed, got {:?}", other),
        }
        assert_ne!(c.state(), AttachmentState::Attached);
        assert_eq!(c.host(), None);
    }

    #[test]
    fn test_detach_to_floating_resets_state() {
        let (locator, _) = FakeLocator::delayed(42, u32::MAX);
        let mut c =
            AttachmentController::new(locator, FakeReparenter::default(), SurfaceHandle(7), policy(2));

        c.begin_attach();
        drive(&mut c);
        assert_eq!(c.state(), AttachmentState::Lost);

        c.detach_to_floating().unwrap();
        assert_eq!(c.state(), AttachmentState::Detached);
        assert_eq!(c.tick(), TickOutcome::Idle);
    }

    #[test]
    fn test_state_serialization() {
        assert_eq!(
            serde_json::to_string(&AttachmentState::Attached).unwrap(),
            "\"attached\""
        );
        let parsed: AttachmentState = serde_json::from_str("\"lost\"").unwrap();
        assert_eq!(parsed, AttachmentState::Lost);
    }
}
