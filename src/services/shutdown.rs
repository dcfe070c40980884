use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;
use tokio::signal;

/// How a coordinator learns that the process is going away. Exactly one mode
/// per coordinator; re-registration is not supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownMode {
    /// No wiring; the application calls the shutdown handler itself.
    #[default]
    None,
    /// Added to the process-wide registry, fired by
    /// [`fire_lifecycle_shutdown`] when the embedding application tears down.
    LifecycleEvent,
    /// A background task watches for SIGINT/SIGTERM and fires the handler.
    ProcessExit,
}

impl ShutdownMode {
    /// Maps a configuration string to a mode; unknown values fall back to
    /// no wiring.
    pub fn from_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "" | "none" => ShutdownMode::None,
            "lifecycle" | "lifecycle-event" => ShutdownMode::LifecycleEvent,
            "process-exit" | "exit" => ShutdownMode::ProcessExit,
            other => {
                tracing::warn!("Unknown shutdown mode '{}', using none", other);
                ShutdownMode::None
            }
        }
    }
}

/// Receives the single shutdown callback.
#[async_trait::async_trait]
pub trait ShutdownListener: Send + Sync {
    async fn on_shutdown(&self);
}

static LIFECYCLE_LISTENERS: Mutex<Vec<Arc<dyn ShutdownListener>>> = Mutex::new(Vec::new());

/// Wires `listener` to the chosen shutdown trigger.
pub fn register(listener: Arc<dyn ShutdownListener>, mode: ShutdownMode) {
    match mode {
        ShutdownMode::None => {}
        ShutdownMode::LifecycleEvent => register_lifecycle_listener(listener),
        ShutdownMode::ProcessExit => register_exit_watcher(listener),
    }
}

/// Adds `listener` to the process-wide registry unless that exact instance
/// is already present.
pub fn register_lifecycle_listener(listener: Arc<dyn ShutdownListener>) {
    let mut listeners = LIFECYCLE_LISTENERS.lock().unwrap();
    if listeners.iter().any(|l| same_listener(l, &listener)) {
        return;
    }
    listeners.push(listener);
}

/// Removes `listener` from the registry; unknown instances are ignored.
pub fn deregister_lifecycle_listener(listener: &Arc<dyn ShutdownListener>) {
    LIFECYCLE_LISTENERS
        .lock()
        .unwrap()
        .retain(|l| !same_listener(l, listener));
}

/// Fans the lifecycle-teardown event out to every registered listener,
/// sequentially. Order is unspecified.
pub async fn fire_lifecycle_shutdown() {
    let listeners: Vec<Arc<dyn ShutdownListener>> = LIFECYCLE_LISTENERS
        .lock()
        .unwrap()
        .iter()
        .cloned()
        .collect();

    if listeners.is_empty() {
        return;
    }

    tracing::info!("🛑 Lifecycle shutdown, notifying {} listener(s)", listeners.len());
    for listener in listeners {
        listener.on_shutdown().await;
    }
}

fn same_listener(a: &Arc<dyn ShutdownListener>, b: &Arc<dyn ShutdownListener>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Spawns the watcher that fires `listener` when the process is asked to
/// exit. Outside a tokio runtime this logs an error and installs nothing.
pub fn register_exit_watcher(listener: Arc<dyn ShutdownListener>) {
    let Ok(handle) = Handle::try_current() else {
        tracing::error!("Process-exit shutdown mode needs a tokio runtime, nothing registered");
        return;
    };

    handle.spawn(async move {
        shutdown_signal().await;
        listener.on_shutdown().await;
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("⌨️  Ctrl+C received, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("💤 SIGTERM received, starting graceful shutdown...");
        },
    }
}
