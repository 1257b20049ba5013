pub mod algorithms;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod router;
pub mod server;
pub mod simulation;

pub use error::{Error, Phase, Result};

pub type RouterId = String;

/// Resolves when a shutdown is broadcast. A closed channel never resolves:
/// with no sender left, nobody can ask for a shutdown any more.
pub(crate) async fn shutdown_signalled(shutdown: &mut tokio::sync::broadcast::Receiver<()>) {
    use tokio::sync::broadcast::error::RecvError;

    match shutdown.recv().await {
        Ok(()) | Err(RecvError::Lagged(_)) => {}
        Err(RecvError::Closed) => std::future::pending().await,
    }
}
