//! Process shutdown coordination
//!
//! Platform signals are turned into a single cancellation of a
//! [`CancellationToken`]. The supervision loop polls that token and runs its
//! teardown on its own. Signal kinds after which the platform kills the
//! process as soon as the handler returns (console close, logoff, system
//! shutdown on Windows) hold the handler itself until teardown reports
//! completion through [`ShutdownCoordinator::mark_drained`].

use std::fmt;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Notification that asked the process to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Ctrl+C / SIGINT
    Interrupt,
    /// SIGTERM / Ctrl+Break
    Terminate,
    /// Console window closed
    Close,
    /// User logging off
    Logoff,
    /// System shutting down
    SystemShutdown,
}

impl ShutdownSignal {
    /// How the signal path must wait once the token is cancelled
    pub fn stop_waiter(&self) -> StopWaiter {
        match self {
            ShutdownSignal::Close | ShutdownSignal::Logoff | ShutdownSignal::SystemShutdown => {
                StopWaiter::UntilDrained
            }
            ShutdownSignal::Interrupt | ShutdownSignal::Terminate => StopWaiter::Immediate,
        }
    }
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSignal::Interrupt => write!(f, "interrupt"),
            ShutdownSignal::Terminate => write!(f, "terminate"),
            ShutdownSignal::Close => write!(f, "close"),
            ShutdownSignal::Logoff => write!(f, "logoff"),
            ShutdownSignal::SystemShutdown => write!(f, "system shutdown"),
        }
    }
}

/// Wait-for-graceful-stop behaviour of a signal handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopWaiter {
    /// Return to the platform right after cancelling
    Immediate,
    /// Hold until teardown has completed
    UntilDrained,
}

impl StopWaiter {
    /// Wait according to this policy
    pub async fn wait(&self, coordinator: &ShutdownCoordinator) {
        match self {
            StopWaiter::Immediate => {}
            StopWaiter::UntilDrained => coordinator.wait_drained().await,
        }
    }

    /// Blocking variant of [`StopWaiter::wait`] for handlers that run on a
    /// platform thread. Must not be called from a runtime worker thread.
    pub fn block(&self, coordinator: &ShutdownCoordinator) {
        match self {
            StopWaiter::Immediate => {}
            StopWaiter::UntilDrained => futures::executor::block_on(coordinator.wait_drained()),
        }
    }
}

/// Stream of shutdown notifications consumed by the listener task
#[async_trait]
pub trait SignalSource: Send {
    /// Next notification, or `None` once the source can deliver no more
    async fn recv(&mut self) -> Option<ShutdownSignal>;
}

struct Inner {
    token: CancellationToken,
    signal: OnceLock<ShutdownSignal>,
    drained: watch::Sender<bool>,
}

/// Owns the process-wide cancellation token.
///
/// Cheap to clone; all clones share the same token.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

impl ShutdownCoordinator {
    /// Create a coordinator with an unset token
    pub fn new() -> Self {
        let (drained, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                token: CancellationToken::new(),
                signal: OnceLock::new(),
                drained,
            }),
        }
    }

    /// The shared cancellation token
    pub fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    /// Whether shutdown has been requested
    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// The first signal that requested shutdown
    pub fn signal(&self) -> Option<ShutdownSignal> {
        self.inner.signal.get().copied()
    }

    /// Request shutdown. Returns `false` if shutdown was already requested.
    pub fn request(&self, signal: ShutdownSignal) -> bool {
        let first = self.inner.signal.set(signal).is_ok();
        self.inner.token.cancel();
        first
    }

    /// Report that teardown has completed
    pub fn mark_drained(&self) {
        self.inner.drained.send_replace(true);
    }

    /// Wait until [`ShutdownCoordinator::mark_drained`] has been called
    pub async fn wait_drained(&self) {
        let mut rx = self.inner.drained.subscribe();
        // The sender lives in `inner`, so the channel cannot close here.
        let _ = rx.wait_for(|drained| *drained).await;
    }

    /// Report teardown complete and wait for the listener task to end.
    ///
    /// Returns `false` if the listener panicked or was aborted; the failure is
    /// logged, not propagated.
    pub async fn finish(&self, listener: JoinHandle<()>) -> bool {
        self.mark_drained();
        match listener.await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Signal listener task failed: {}", e);
                false
            }
        }
    }

    /// Handle a notification on the platform thread that delivered it.
    ///
    /// Cancels the token, then holds the calling thread as the signal's
    /// [`StopWaiter`] dictates.
    pub fn handle_blocking(&self, signal: ShutdownSignal) {
        tracing::info!("Console event received ({})", signal);
        if !self.request(signal) {
            tracing::debug!("Shutdown already in progress");
        }

        let waiter = signal.stop_waiter();
        waiter.block(self);
        if waiter == StopWaiter::UntilDrained {
            tracing::info!("Application terminated");
        }
    }

    /// Register platform signal handlers and spawn the listener task.
    ///
    /// The task ends once teardown is reported complete.
    pub fn install(&self) -> std::io::Result<JoinHandle<()>> {
        let listeners = SignalListeners::register()?;
        #[cfg(windows)]
        console::register(self)?;

        let coordinator = self.clone();
        Ok(tokio::spawn(coordinator.listen(listeners)))
    }

    /// Feed notifications from `source` into the token until teardown is
    /// reported complete.
    pub async fn listen<S: SignalSource>(self, mut source: S) {
        loop {
            tokio::select! {
                signal = source.recv() => {
                    let Some(signal) = signal else {
                        self.wait_drained().await;
                        return;
                    };

                    tracing::info!("Signal received ({})", signal);
                    if !self.request(signal) {
                        tracing::debug!("Shutdown already in progress");
                    }

                    let waiter = signal.stop_waiter();
                    waiter.wait(&self).await;
                    if waiter == StopWaiter::UntilDrained {
                        tracing::info!("Application terminated");
                        return;
                    }
                }
                _ = self.wait_drained() => return,
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Registered platform signal streams.
///
/// On Windows only Ctrl+C and Ctrl+Break arrive here; close, logoff and
/// system shutdown go through [`console`] so the handler can hold the
/// process open.
struct SignalListeners {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,

    #[cfg(windows)]
    ctrl_c: tokio::signal::windows::CtrlC,
    #[cfg(windows)]
    ctrl_break: tokio::signal::windows::CtrlBreak,
}

impl SignalListeners {
    #[cfg(unix)]
    fn register() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    #[cfg(windows)]
    fn register() -> std::io::Result<Self> {
        use tokio::signal::windows;

        Ok(Self {
            ctrl_c: windows::ctrl_c()?,
            ctrl_break: windows::ctrl_break()?,
        })
    }

    #[cfg(not(any(unix, windows)))]
    fn register() -> std::io::Result<Self> {
        Ok(Self {})
    }

    #[cfg(unix)]
    async fn next(&mut self) -> Option<ShutdownSignal> {
        tokio::select! {
            _ = self.interrupt.recv() => Some(ShutdownSignal::Interrupt),
            _ = self.terminate.recv() => Some(ShutdownSignal::Terminate),
        }
    }

    #[cfg(windows)]
    async fn next(&mut self) -> Option<ShutdownSignal> {
        tokio::select! {
            _ = self.ctrl_c.recv() => Some(ShutdownSignal::Interrupt),
            _ = self.ctrl_break.recv() => Some(ShutdownSignal::Terminate),
        }
    }

    #[cfg(not(any(unix, windows)))]
    async fn next(&mut self) -> Option<ShutdownSignal> {
        tokio::signal::ctrl_c().await.ok()?;
        Some(ShutdownSignal::Interrupt)
    }
}

#[async_trait]
impl SignalSource for SignalListeners {
    async fn recv(&mut self) -> Option<ShutdownSignal> {
        self.next().await
    }
}

/// Console control handler for the events Windows follows with process
/// termination once the handler returns.
#[cfg(windows)]
mod console {
    use std::io;
    use std::sync::OnceLock;

    use windows_sys::Win32::Foundation::BOOL;
    use windows_sys::Win32::System::Console::{
        SetConsoleCtrlHandler, CTRL_CLOSE_EVENT, CTRL_LOGOFF_EVENT, CTRL_SHUTDOWN_EVENT,
    };

    use super::{ShutdownCoordinator, ShutdownSignal};

    // The OS callback takes no context pointer.
    static COORDINATOR: OnceLock<ShutdownCoordinator> = OnceLock::new();

    pub(super) fn register(coordinator: &ShutdownCoordinator) -> io::Result<()> {
        if COORDINATOR.set(coordinator.clone()).is_err() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "console control handler already registered",
            ));
        }

        // Registered after the tokio handlers, so it is consulted first.
        let added = unsafe { SetConsoleCtrlHandler(Some(handler), 1) };
        if added == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    unsafe extern "system" fn handler(ctrl_type: u32) -> BOOL {
        let signal = match ctrl_type {
            CTRL_CLOSE_EVENT => ShutdownSignal::Close,
            CTRL_LOGOFF_EVENT => ShutdownSignal::Logoff,
            CTRL_SHUTDOWN_EVENT => ShutdownSignal::SystemShutdown,
            // Ctrl+C and Ctrl+Break fall through to the tokio handlers.
            _ => return 0,
        };

        match COORDINATOR.get() {
            Some(coordinator) => {
                coordinator.handle_blocking(signal);
                1
            }
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct ChannelSource(mpsc::Receiver<ShutdownSignal>);

    #[async_trait]
    impl SignalSource for ChannelSource {
        async fn recv(&mut self) -> Option<ShutdownSignal> {
            self.0.recv().await
        }
    }

    fn spawn_listener(
        coordinator: &ShutdownCoordinator,
    ) -> (mpsc::Sender<ShutdownSignal>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(4);
        let listener = tokio::spawn(coordinator.clone().listen(ChannelSource(rx)));
        (tx, listener)
    }

    #[test]
    fn test_request_is_single_fire() {
        let coordinator = ShutdownCoordinator::new();
        assert!(!coordinator.is_cancelled());
        assert_eq!(coordinator.signal(), None);

        assert!(coordinator.request(ShutdownSignal::Terminate));
        assert!(!coordinator.request(ShutdownSignal::Interrupt));

        assert!(coordinator.is_cancelled());
        assert_eq!(coordinator.signal(), Some(ShutdownSignal::Terminate));
    }

    #[test]
    fn test_clones_share_token() {
        let coordinator = ShutdownCoordinator::new();
        let token = coordinator.token();
        coordinator.clone().request(ShutdownSignal::Terminate);
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_stop_waiter_per_signal() {
        assert_eq!(ShutdownSignal::Interrupt.stop_waiter(), StopWaiter::Immediate);
        assert_eq!(ShutdownSignal::Terminate.stop_waiter(), StopWaiter::Immediate);
        assert_eq!(ShutdownSignal::Close.stop_waiter(), StopWaiter::UntilDrained);
        assert_eq!(ShutdownSignal::Logoff.stop_waiter(), StopWaiter::UntilDrained);
        assert_eq!(
            ShutdownSignal::SystemShutdown.stop_waiter(),
            StopWaiter::UntilDrained
        );
    }

    #[tokio::test]
    async fn test_immediate_waiter_returns() {
        let coordinator = ShutdownCoordinator::new();
        tokio::time::timeout(
            Duration::from_millis(100),
            StopWaiter::Immediate.wait(&coordinator),
        )
        .await
        .expect("immediate waiter should not block");
    }

    #[tokio::test(start_paused = true)]
    async fn test_drained_waiter_blocks_until_drained() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.request(ShutdownSignal::Close);

        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { StopWaiter::UntilDrained.wait(&coordinator).await })
        };

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!waiter.is_finished());

        coordinator.mark_drained();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish after drain")
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_drained_after_mark() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.mark_drained();
        tokio::time::timeout(Duration::from_millis(100), coordinator.wait_drained())
            .await
            .expect("already drained");
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_interrupt_cancels_and_keeps_running() {
        let coordinator = ShutdownCoordinator::new();
        let (tx, listener) = spawn_listener(&coordinator);

        tx.send(ShutdownSignal::Interrupt).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(coordinator.is_cancelled());
        assert_eq!(coordinator.signal(), Some(ShutdownSignal::Interrupt));
        assert!(!listener.is_finished());

        // A second signal is absorbed; the first one stays recorded.
        tx.send(ShutdownSignal::Terminate).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(coordinator.signal(), Some(ShutdownSignal::Interrupt));
        assert!(!listener.is_finished());

        coordinator.mark_drained();
        tokio::time::timeout(Duration::from_secs(1), listener)
            .await
            .expect("listener should end after drain")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_close_holds_until_drained() {
        let coordinator = ShutdownCoordinator::new();
        let (tx, listener) = spawn_listener(&coordinator);

        tx.send(ShutdownSignal::Close).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(coordinator.is_cancelled());
        assert_eq!(coordinator.signal(), Some(ShutdownSignal::Close));
        assert!(!listener.is_finished());

        coordinator.mark_drained();
        tokio::time::timeout(Duration::from_secs(1), listener)
            .await
            .expect("listener should end after drain")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_ends_on_drain_without_signal() {
        let coordinator = ShutdownCoordinator::new();
        let (_tx, listener) = spawn_listener(&coordinator);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!coordinator.is_cancelled());

        coordinator.mark_drained();
        tokio::time::timeout(Duration::from_secs(1), listener)
            .await
            .expect("listener should end after drain")
            .unwrap();
        assert!(!coordinator.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_closed_source_waits_for_drain() {
        let coordinator = ShutdownCoordinator::new();
        let (tx, listener) = spawn_listener(&coordinator);
        drop(tx);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!listener.is_finished());

        coordinator.mark_drained();
        tokio::time::timeout(Duration::from_secs(1), listener)
            .await
            .expect("listener should end after drain")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_drains_and_joins_listener() {
        let coordinator = ShutdownCoordinator::new();
        let (_tx, listener) = spawn_listener(&coordinator);
        assert!(coordinator.finish(listener).await);
    }

    #[tokio::test]
    async fn test_finish_reports_failed_listener() {
        let coordinator = ShutdownCoordinator::new();
        let listener = tokio::spawn(async { panic!("listener crashed") });
        assert!(!coordinator.finish(listener).await);
    }

    #[test]
    fn test_blocking_handler_returns_at_once_for_interrupt() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.handle_blocking(ShutdownSignal::Interrupt);
        assert!(coordinator.is_cancelled());
    }

    #[test]
    fn test_blocking_handler_holds_thread_until_drained() {
        let coordinator = ShutdownCoordinator::new();
        let handler = {
            let coordinator = coordinator.clone();
            std::thread::spawn(move || coordinator.handle_blocking(ShutdownSignal::SystemShutdown))
        };

        while !coordinator.is_cancelled() {
            std::thread::yield_now();
        }
        std::thread::sleep(Duration::from_millis(50));
        assert!(!handler.is_finished());
        assert_eq!(coordinator.signal(), Some(ShutdownSignal::SystemShutdown));

        coordinator.mark_drained();
        handler.join().unwrap();
    }
}
