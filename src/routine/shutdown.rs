use futures::future;
use tokio::select;
use tokio::sync::watch;
use tokio::time::Duration;
use tokio::{signal, time};
use tracing::{info, warn};

/// Observes SIGINT/SIGTERM so that long waits can stop early and cleanup
/// still runs.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<Option<&'static str>>,
}

impl Shutdown {
    pub fn listen() -> Self {
        Self {
            rx: spawn_shutdown_listener(),
        }
    }

    pub fn manual() -> (watch::Sender<Option<&'static str>>, Self) {
        let (tx, rx) = watch::channel(None);
        (tx, Self { rx })
    }

    pub fn requested(&self) -> bool {
        self.rx.borrow().is_some()
    }

    pub fn signal(&self) -> Option<&'static str> {
        *self.rx.borrow()
    }

    pub async fn sleep_or_shutdown(&mut self, duration: Duration) -> bool {
        if self.requested() {
            return true;
        }

        let rx = &mut self.rx;
        let signalled = async { rx.wait_for(Option::is_some).await.is_ok() };

        select! {
            _ = time::sleep(duration) => false,
            true = signalled => true,
        }
    }
}

fn spawn_shutdown_listener() -> watch::Receiver<Option<&'static str>> {
    let (shutdown_tx, shutdown_rx) = watch::channel(None);

    tokio::spawn(async move {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate()).ok();

        let term_future = async {
            if let Some(ref mut sigterm) = sigterm {
                sigterm.recv().await;
                Some("SIGTERM")
            } else {
                future::pending::<Option<&'static str>>().await
            }
        };

        select! {
            res = signal::ctrl_c() => {
                if res.is_ok() {
                    info!("Received SIGINT. Cleaning up before exiting...");
                    let _ = shutdown_tx.send(Some("SIGINT"));
                } else {
                    warn!("Failed to listen for SIGINT: {:?}", res.err());
                }
            }
            _ = term_future => {
                info!("Received SIGTERM. Cleaning up before exiting...");
                let _ = shutdown_tx.send(Some("SIGTERM"));
            }
        }
        // keep the sender alive so receivers never observe a closed channel
        future::pending::<()>().await;
    });

    shutdown_rx
}
