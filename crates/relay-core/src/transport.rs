//! Reliable transmission primitives.
//!
//! A stream socket may transfer fewer bytes per call than requested; that is
//! normal, not an error.  These helpers loop until the requested byte count
//! has been transferred or the transport fails hard, and report how many
//! bytes actually moved.  Callers detect failure by comparing the returned
//! count against the requested length.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Writes all of `buf`, looping over short writes.
///
/// Returns the number of bytes actually written.  On a hard transport error
/// after partial progress the loop stops and the short count is returned;
/// an error before any byte was written is returned as `Err`.
///
/// # Errors
///
/// Returns the underlying `std::io::Error` only when nothing was sent.
pub async fn send_all<W>(writer: &mut W, buf: &[u8]) -> std::io::Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let mut total = 0;
    while total < buf.len() {
        match writer.write(&buf[total..]).await {
            // A zero-length write means the peer can accept nothing more.
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) if total == 0 => return Err(e),
            Err(_) => break,
        }
    }
    Ok(total)
}

/// Reads exactly `buf.len()` bytes, looping over short reads.
///
/// Returns the number of bytes actually read.  A clean end-of-stream stops
/// the loop early: `Ok(0)` therefore means the peer closed the connection
/// before sending anything, and a count below `buf.len()` means it closed
/// mid-transfer.  A hard transport error before any byte arrived is
/// returned as `Err`.
///
/// # Errors
///
/// Returns the underlying `std::io::Error` only when nothing was received.
pub async fn recv_exact<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut total = 0;
    while total < buf.len() {
        match reader.read(&mut buf[total..]).await {
            Ok(0) => break, // end of stream
            Ok(n) => total += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) if total == 0 => return Err(e),
            Err(_) => break,
        }
    }
    Ok(total)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// Round-trips `len` bytes through a duplex pipe whose internal buffer is
    /// far smaller than the transfer, forcing both helpers through many
    /// short reads and writes.
    async fn round_trip(len: usize) {
        // 16-byte internal buffer: a 64 KiB transfer needs thousands of
        // underlying transfers to complete.
        let (mut a, mut b) = tokio::io::duplex(16);
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();

        let send_data = data.clone();
        let writer = tokio::spawn(async move {
            let sent = send_all(&mut a, &send_data).await.expect("send failed");
            assert_eq!(sent, send_data.len());
            a // keep the write end alive until the send completes
        });

        let mut received = vec![0u8; len];
        let got = recv_exact(&mut b, &mut received).await.expect("recv failed");
        assert_eq!(got, len);
        assert_eq!(received, data);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_round_trip_zero_bytes() {
        round_trip(0).await;
    }

    #[tokio::test]
    async fn test_round_trip_single_chunk() {
        round_trip(10).await;
    }

    #[tokio::test]
    async fn test_round_trip_spanning_many_transfers() {
        round_trip(64 * 1024).await;
    }

    #[tokio::test]
    async fn test_recv_exact_returns_zero_on_immediate_close() {
        let (a, mut b) = tokio::io::duplex(16);
        drop(a); // peer closes without sending
        let mut buf = [0u8; 8];
        let got = recv_exact(&mut b, &mut buf).await.expect("recv failed");
        assert_eq!(got, 0);
    }

    #[tokio::test]
    async fn test_recv_exact_returns_short_count_on_midstream_close() {
        let (mut a, mut b) = tokio::io::duplex(16);
        a.write_all(&[1, 2, 3]).await.unwrap();
        drop(a);
        let mut buf = [0u8; 8];
        let got = recv_exact(&mut b, &mut buf).await.expect("recv failed");
        assert_eq!(got, 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_send_all_reports_short_count_when_peer_gone() {
        let (mut a, b) = tokio::io::duplex(16);
        drop(b);
        let sent = send_all(&mut a, &[0u8; 256]).await;
        // Either an immediate error or a short count is acceptable; a full
        // count would mean the failure went unnoticed.
        match sent {
            Ok(n) => assert!(n < 256, "send into a closed pipe reported {n}/256"),
            Err(_) => {}
        }
    }
}
