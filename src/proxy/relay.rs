//! Bidirectional byte relay for established tunnels.
//!
//! Two copy tasks run with no ordering guarantee, one per direction, each
//! over its own pooled buffer. Whichever finishes first tears the whole
//! tunnel down: both transports are closed immediately, which fails the
//! other task's blocked read or write. This is not a graceful half-close,
//! and it is what terminates idle tunnels once one peer goes away.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::pool::PooledBuf;
use crate::server::ServerMetrics;

/// Relay bytes between the client and the dialed destination until either
/// side closes.
///
/// Returns only after both copy tasks have finished, so the pooled
/// buffers are never released while a read or write is still in flight.
pub async fn run<C, U>(
    client: C,
    upstream: U,
    up_buf: PooledBuf,
    down_buf: PooledBuf,
    metrics: Arc<ServerMetrics>,
) where
    C: AsyncRead + AsyncWrite + Send + 'static,
    U: AsyncRead + AsyncWrite + Send + 'static,
{
    let (client_rd, client_wr) = tokio::io::split(client);
    let (upstream_rd, upstream_wr) = tokio::io::split(upstream);

    let up_metrics = Arc::clone(&metrics);
    let mut up = tokio::spawn(pipe(client_rd, upstream_wr, up_buf, move |n| {
        up_metrics.add_bytes_up(n)
    }));
    let mut down = tokio::spawn(pipe(upstream_rd, client_wr, down_buf, move |n| {
        metrics.add_bytes_down(n)
    }));

    // First finisher wins: abort the other task so its pending I/O is
    // dropped, then await it so its buffer is back in the pool before the
    // session hands its own buffers back.
    tokio::select! {
        _ = &mut up => {
            down.abort();
            let _ = down.await;
        }
        _ = &mut down => {
            up.abort();
            let _ = up.await;
        }
    }
}

/// Copy from `src` to `dst` until EOF or the first I/O error.
///
/// `count` is invoked once per chunk that was fully written.
async fn pipe<R, W, F>(mut src: R, mut dst: W, mut buf: PooledBuf, count: F)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    F: Fn(u64),
{
    loop {
        let n = match src.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(_) => break,
        };
        if dst.write_all(&buf[..n]).await.is_err() {
            break;
        }
        count(n as u64);
    }

    // Flush the FIN so a peer that keeps reading sees EOF.
    let _ = dst.shutdown().await;
}
