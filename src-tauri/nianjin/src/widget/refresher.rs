// 周期刷新器 - 在独立线程上推送进度快照，并驱动挂载状态机。
//
// 所有对挂件窗口句柄的原生操作都由这个线程独占（唯一 mutator），
// 托盘/命令只通过标志位 + Notify 跟它打交道。

use crate::widget::window::{WidgetWindow, WIDGET_WINDOW_LABEL};
use nianjin_core::attach::AttachmentState;
use nianjin_core::progress;
use nianjin_core::settings::Settings;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use tauri::{AppHandle, Manager};
use tokio::sync::Notify;
use tokio::time::{interval, sleep, Duration};

// 刷新线程控制标志位
const FLAG_PUSH: u8 = 1; // 立即重算并推送进度
const FLAG_REATTACH: u8 = 2; // 强制重跑定位 + 挂载

// AttachmentState 的原子镜像（跨线程读状态用）
const STATE_DETACHED: u8 = 0;
const STATE_ATTACHING: u8 = 1;
const STATE_ATTACHED: u8 = 2;
const STATE_LOST: u8 = 3;

#[cfg(target_os = "windows")]
fn mirror(state: AttachmentState) -> u8 {
    match state {
        AttachmentState::Detached => STATE_DETACHED,
        AttachmentState::Attaching => STATE_ATTACHING,
        AttachmentState::Attached => STATE_ATTACHED,
        AttachmentState::Lost => STATE_LOST,
    }
}

pub struct WidgetRefresher {
    app: AppHandle,
    running: Arc<AtomicBool>,
    control_flags: Arc<AtomicU8>,
    notify: Arc<Notify>,
    state: Arc<AtomicU8>,
}

impl WidgetRefresher {
    pub fn new(app: AppHandle) -> Self {
        Self {
            app,
            running: Arc::new(AtomicBool::new(false)),
            control_flags: Arc::new(AtomicU8::new(0)),
            notify: Arc::new(Notify::new()),
            state: Arc::new(AtomicU8::new(STATE_DETACHED)),
        }
    }

    /// 启动刷新线程（整个进程生命周期只调一次）。
    pub fn start(&self) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }

        let app = self.app.clone();
        let running = Arc::clone(&self.running);
        let control_flags = Arc::clone(&self.control_flags);
        let notify = Arc::clone(&self.notify);
        let state = Arc::clone(&self.state);

        // 在新线程中创建 Tokio runtime
        std::thread::spawn(move || {
            let rt = tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime");
            rt.block_on(run_loop(app, running, control_flags, notify, state));
        });
    }

    /// 托盘"立即刷新"：唤醒线程重算并推送一次进度。
    pub fn request_push(&self) {
        self.control_flags.fetch_or(FLAG_PUSH, Ordering::AcqRel);
        self.notify.notify_one();
    }

    /// 托盘"重新挂载"：任意状态下强制重跑整轮定位 + 挂载。
    pub fn request_reattach(&self) {
        self.control_flags.fetch_or(FLAG_REATTACH, Ordering::AcqRel);
        self.notify.notify_one();
    }

    /// 当前挂载状态（刷新线程维护的镜像）。
    pub fn attachment_state(&self) -> AttachmentState {
        match self.state.load(Ordering::Acquire) {
            STATE_ATTACHING => AttachmentState::Attaching,
            STATE_ATTACHED => AttachmentState::Attached,
            STATE_LOST => AttachmentState::Lost,
            _ => AttachmentState::Detached,
        }
    }

    #[allow(dead_code)]
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.notify.notify_one();
    }
}

/// 等前端标记 ready（DOM + 事件监听器挂好），最多 100 秒。
async fn wait_window_ready() {
    let max_wait_ms: u64 = 100_000;
    let check_interval_ms: u64 = 100;
    let mut waited = 0u64;
    while !WidgetWindow::is_ready() && waited < max_wait_ms {
        sleep(Duration::from_millis(check_interval_ms)).await;
        waited += check_interval_ms;
    }
    if !WidgetWindow::is_ready() {
        eprintln!("[WARN] 挂件窗口初始化超时（等待了 {}ms），继续后续流程", max_wait_ms);
    }
}

fn push_progress(app: &AppHandle) {
    let p = progress::today();
    if let Err(e) = WidgetWindow::push_progress(app, &p) {
        eprintln!("[WARN] {}", e);
    }
}

#[cfg(target_os = "windows")]
async fn run_loop(
    app: AppHandle,
    running: Arc<AtomicBool>,
    control_flags: Arc<AtomicU8>,
    notify: Arc<Notify>,
    state_mirror: Arc<AtomicU8>,
) {
    use crate::widget::mount::{Win32Reparenter, WorkerWLocator};
    use nianjin_core::attach::{
        AttachError, AttachmentController, RetryPolicy, ShellLayerLocator, TickOutcome,
        WindowReparenter,
    };

    // 驱动一轮挂载序列直到出结果。探测间隔用 settle 异步等待，
    // ShellRestarted/ReparentFailed 允许自动重启整轮，最多 2 次。
    async fn drive_attach<L: ShellLayerLocator, R: WindowReparenter>(
        controller: &mut AttachmentController<L, R>,
        state_mirror: &AtomicU8,
    ) -> TickOutcome {
        let mut restarts = 0u32;
        loop {
            let outcome = controller.tick();
            state_mirror.store(mirror(controller.state()), Ordering::Release);
            match &outcome {
                TickOutcome::Probing { .. } => sleep(controller.settle()).await,
                TickOutcome::Failed(AttachError::ShellRestarted)
                | TickOutcome::Failed(AttachError::ReparentFailed(_))
                    if restarts < 2 =>
                {
                    // Lost 状态的下一次 tick 会自动重跑整轮定位
                    restarts += 1;
                    sleep(controller.settle()).await;
                }
                _ => return outcome,
            }
        }
    }

    // 处理一轮挂载的最终结果。LayerUnavailable 降级为普通浮动窗口，
    // 其余失败留在 Lost，下个刷新周期自动再试。
    fn handle_outcome<L: ShellLayerLocator, R: WindowReparenter>(
        app: &AppHandle,
        controller: &mut AttachmentController<L, R>,
        state_mirror: &AtomicU8,
        outcome: TickOutcome,
    ) {
        match outcome {
            TickOutcome::Attached => {}
            TickOutcome::Failed(AttachError::LayerUnavailable { attempts }) => {
                eprintln!(
                    "[WARN] {} 次探测后仍未找到桌面宿主层，降级为普通浮动窗口",
                    attempts
                );
                if let Err(e) = controller.detach_to_floating() {
                    eprintln!("[WARN] 降级失败: {}", e);
                }
                state_mirror.store(mirror(controller.state()), Ordering::Release);
                if let Some(w) = app.get_webview_window(WIDGET_WINDOW_LABEL) {
                    let _ = w.show();
                }
            }
            TickOutcome::Failed(e) => {
                eprintln!("[WARN] 挂载失败: {}，下个刷新周期重试", e);
            }
            TickOutcome::Probing { .. } | TickOutcome::Idle => {}
        }
    }

    wait_window_ready().await;

    let settings = Settings::new();
    let app_settings = settings.get_settings().unwrap_or_default();

    let Some(window) = app.get_webview_window(WIDGET_WINDOW_LABEL) else {
        eprintln!("[WARN] 挂件窗口不存在，刷新线程退出");
        return;
    };

    // 模糊要等窗口句柄存在之后再开
    if app_settings.panel_blur {
        if let Err(e) = WidgetWindow::apply_blur(&app, true) {
            eprintln!("[WARN] 启用面板模糊失败: {}", e);
        }
    }

    let surface = match WidgetWindow::surface_handle(&app) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("[WARN] {}，刷新线程退出", e);
            return;
        }
    };

    // SetWindowPos 吃的是物理像素
    let size = window
        .outer_size()
        .map(|s| (s.width as i32, s.height as i32))
        .unwrap_or((368, 368));

    let reparenter = Win32Reparenter {
        origin: (app_settings.widget_x, app_settings.widget_y),
        size,
    };
    let mut controller = AttachmentController::new(
        WorkerWLocator,
        reparenter,
        surface,
        RetryPolicy::default(),
    );

    push_progress(&app);

    // 启动挂载
    controller.begin_attach();
    state_mirror.store(mirror(controller.state()), Ordering::Release);
    let outcome = drive_attach(&mut controller, &state_mirror).await;
    handle_outcome(&app, &mut controller, &state_mirror, outcome);

    let mut interval_minutes = app_settings.refresh_interval_minutes.max(1);
    let mut ticker = interval(Duration::from_secs(interval_minutes as u64 * 60));
    // interval 的第一跳是立即的，上面已经推过一次了
    ticker.tick().await;

    while running.load(Ordering::Acquire) {
        tokio::select! {
            _ = ticker.tick() => {
                push_progress(&app);

                // 周期校验：Explorer 重启会让宿主句柄失效，状态机转 Lost
                // 后自动重新定位。降级成浮动窗口（Detached）后不再打扰
                if controller.state() != AttachmentState::Detached {
                    let outcome = drive_attach(&mut controller, &state_mirror).await;
                    handle_outcome(&app, &mut controller, &state_mirror, outcome);
                }
            }
            _ = notify.notified() => {
                let flags = control_flags.swap(0, Ordering::AcqRel);
                if flags & FLAG_PUSH != 0 {
                    push_progress(&app);
                }
                if flags & FLAG_REATTACH != 0 {
                    controller.begin_attach();
                    state_mirror.store(mirror(controller.state()), Ordering::Release);
                    let outcome = drive_attach(&mut controller, &state_mirror).await;
                    handle_outcome(&app, &mut controller, &state_mirror, outcome);
                }
            }
        }

        // 设置里的刷新间隔变了就重建定时器
        if let Ok(s) = settings.get_settings() {
            let minutes = s.refresh_interval_minutes.max(1);
            if minutes != interval_minutes {
                interval_minutes = minutes;
                ticker = interval(Duration::from_secs(interval_minutes as u64 * 60));
                ticker.tick().await;
            }
        }
    }
}

#[cfg(not(target_os = "windows"))]
async fn run_loop(
    app: AppHandle,
    running: Arc<AtomicBool>,
    control_flags: Arc<AtomicU8>,
    notify: Arc<Notify>,
    _state_mirror: Arc<AtomicU8>,
) {
    wait_window_ready().await;

    // 非 Windows 没有桌面层可挂，直接当普通窗口显示
    if let Some(w) = app.get_webview_window(WIDGET_WINDOW_LABEL) {
        let _ = w.show();
    }

    push_progress(&app);

    let settings = Settings::new();
    let mut interval_minutes = settings
        .get_settings()
        .map(|s| s.refresh_interval_minutes.max(1))
        .unwrap_or(1);
    let mut ticker = interval(Duration::from_secs(interval_minutes as u64 * 60));
    ticker.tick().await;

    while running.load(Ordering::Acquire) {
        tokio::select! {
            _ = ticker.tick() => {
                push_progress(&app);
            }
            _ = notify.notified() => {
                let flags = control_flags.swap(0, Ordering::AcqRel);
                if flags & FLAG_PUSH != 0 {
                    push_progress(&app);
                }
                if flags & FLAG_REATTACH != 0 {
                    eprintln!("[WARN] 桌面层挂载仅支持 Windows，忽略重新挂载请求");
                }
            }
        }

        if let Ok(s) = settings.get_settings() {
            let minutes = s.refresh_interval_minutes.max(1);
            if minutes != interval_minutes {
                interval_minutes = minutes;
                ticker = interval(Duration::from_secs(interval_minutes as u64 * 60));
                ticker.tick().await;
            }
        }
    }
}
