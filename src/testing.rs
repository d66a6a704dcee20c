//! In-process HTTP fakes for the backend and Alertmanager.

use std::{net::SocketAddr, time::Duration};

use axum::Router;
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle, time};
use tracing::warn;

#[derive(Debug)]
pub struct FakeServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<Result<(), std::io::Error>>>,
}

impl FakeServer {
    pub async fn spawn(router: Router) -> Result<Self, std::io::Error> {
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let server = axum::serve(listener, router.into_make_service()).with_graceful_shutdown(
            async {
                let _ = shutdown_rx.await;
            },
        );

        let join_handle = tokio::spawn(async move {
            if let Err(error) = server.await {
                warn!(?error, "fake server terminated with error");
                Err(error)
            } else {
                Ok(())
            }
        });

        Ok(Self {
            addr,
            shutdown: Some(shutdown_tx),
            join_handle: Some(join_handle),
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }

        let Some(mut join_handle) = self.join_handle.take() else {
            return;
        };

        tokio::select! {
            _ = &mut join_handle => {}
            _ = time::sleep(Duration::from_secs(2)) => {
                warn!("fake server shutdown timed out; aborting");
                join_handle.abort();
            }
        }
    }
}
