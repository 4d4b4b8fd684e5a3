use super::*;

use bytes::Bytes;

use crate::error::Result;

async fn new_stream_pair() -> Result<(Arc<UdpStream>, UdpSocket, UdpSocket, SocketAddr, SocketAddr)>
{
    let conn_rtp = Arc::new(UdpSocket::bind("127.0.0.1:0").await?);
    let conn_rtcp = Arc::new(UdpSocket::bind("127.0.0.1:0").await?);

    let addr_rtp = conn_rtp.local_addr()?;
    let addr_rtcp = conn_rtcp.local_addr()?;

    let peer_rtp = UdpSocket::bind("127.0.0.1:0").await?;
    let peer_rtcp = UdpSocket::bind("127.0.0.1:0").await?;

    let stream = UdpStream::new(conn_rtp, conn_rtcp);

    Ok((stream, peer_rtp, peer_rtcp, addr_rtp, addr_rtcp))
}

fn make_packet(payload_type: u8, sequence_number: u16, timestamp: u32) -> rtp::packet::Packet {
    rtp::packet::Packet {
        header: rtp::header::Header {
            version: 2,
            payload_type,
            sequence_number,
            timestamp,
            ssrc: 0xfeed,
            ..Default::default()
        },
        payload: Bytes::from(vec![sequence_number as u8; 4]),
    }
}

#[tokio::test]
async fn test_read_rtp_learns_remote_addr() -> Result<()> {
    let (stream, peer_rtp, _peer_rtcp, addr_rtp, _) = new_stream_pair().await?;

    let raw = make_packet(96, 7, 1000).marshal()?;
    peer_rtp.send_to(&raw, addr_rtp).await?;

    let mut header = rtp::header::Header::default();
    let mut payload = vec![0u8; INBOUND_MTU];

    let n = timeout(Duration::from_secs(2), stream.read_rtp(&mut header, &mut payload))
        .await
        .expect("read_rtp timed out")?;

    assert_eq!(n, 4);
    assert_eq!(header.sequence_number, 7);
    assert_eq!(&payload[..n], &[7u8; 4]);

    let r_addr = timeout(Duration::from_secs(2), stream.get_remote_addr_rtp())
        .await
        .expect("get_remote_addr_rtp timed out")?;
    assert_eq!(r_addr, peer_rtp.local_addr()?);

    stream.close();
    Ok(())
}

#[tokio::test]
async fn test_write_blocks_until_remote_addr_known() -> Result<()> {
    let (stream, peer_rtp, _peer_rtcp, addr_rtp, _) = new_stream_pair().await?;

    let writer_stream = Arc::clone(&stream);
    let writer = tokio::spawn(async move {
        let header = rtp::header::Header {
            version: 2,
            payload_type: 96,
            ..Default::default()
        };
        writer_stream.write_rtp(&header, &[1, 2, 3]).await
    });

    // The peer has not sent anything yet, so nothing must arrive.
    let mut buff = vec![0u8; INBOUND_MTU];
    assert!(
        timeout(Duration::from_millis(200), peer_rtp.recv_from(&mut buff))
            .await
            .is_err(),
        "writer must stay blocked before the remote address is known"
    );

    let raw = make_packet(96, 1, 0).marshal()?;
    peer_rtp.send_to(&raw, addr_rtp).await?;

    let (n, _) = timeout(Duration::from_secs(2), peer_rtp.recv_from(&mut buff))
        .await
        .expect("outbound packet never arrived")?;
    assert!(n > 12);

    writer.await.expect("writer task panicked")?;

    stream.close();
    Ok(())
}

#[tokio::test]
async fn test_malformed_rtp_skipped() -> Result<()> {
    let (stream, peer_rtp, _peer_rtcp, addr_rtp, _) = new_stream_pair().await?;

    peer_rtp.send_to(&[0xde, 0xad, 0xbe], addr_rtp).await?;

    let raw = make_packet(96, 42, 5000).marshal()?;
    peer_rtp.send_to(&raw, addr_rtp).await?;

    let mut header = rtp::header::Header::default();
    let mut payload = vec![0u8; INBOUND_MTU];

    let n = timeout(Duration::from_secs(2), stream.read_rtp(&mut header, &mut payload))
        .await
        .expect("read_rtp timed out")?;

    assert_eq!(header.sequence_number, 42);
    assert_eq!(n, 4);

    stream.close();
    Ok(())
}

#[tokio::test]
async fn test_queue_preserves_order() -> Result<()> {
    let (stream, peer_rtp, _peer_rtcp, addr_rtp, _) = new_stream_pair().await?;

    for seq in 1..=5u16 {
        let raw = make_packet(96, seq, seq as u32 * 160).marshal()?;
        peer_rtp.send_to(&raw, addr_rtp).await?;
    }

    let mut header = rtp::header::Header::default();
    let mut payload = vec![0u8; INBOUND_MTU];

    for seq in 1..=5u16 {
        timeout(Duration::from_secs(2), stream.read_rtp(&mut header, &mut payload))
            .await
            .expect("read_rtp timed out")?;
        assert_eq!(header.sequence_number, seq);
    }

    stream.close();
    Ok(())
}

#[tokio::test]
async fn test_close_is_idempotent_and_cascades_eof() -> Result<()> {
    let (stream, _peer_rtp, _peer_rtcp, _, _) = new_stream_pair().await?;

    stream.close();
    stream.close();
    assert!(stream.is_closed());

    let mut header = rtp::header::Header::default();
    let mut payload = vec![0u8; INBOUND_MTU];

    let res = timeout(Duration::from_secs(2), stream.read_rtp(&mut header, &mut payload))
        .await
        .expect("read_rtp must not hang after close");
    assert!(matches!(res, Err(Error::ErrStreamClosed)));

    // And again: once closed, every subsequent read reports end of stream.
    let res = timeout(Duration::from_secs(2), stream.read_rtp(&mut header, &mut payload))
        .await
        .expect("read_rtp must not hang after close");
    assert!(matches!(res, Err(Error::ErrStreamClosed)));

    let res = timeout(Duration::from_secs(2), stream.get_remote_addr_rtp())
        .await
        .expect("get_remote_addr_rtp must not hang after close");
    assert!(matches!(res, Err(Error::ErrStreamClosed)));

    let header = rtp::header::Header::default();
    assert!(matches!(
        stream.write_rtp(&header, &[0u8; 4]).await,
        Err(Error::ErrStreamClosed)
    ));

    Ok(())
}

#[tokio::test]
async fn test_rtcp_reader_learns_addr_before_parsing() -> Result<()> {
    let (stream, _peer_rtp, peer_rtcp, _, addr_rtcp) = new_stream_pair().await?;

    // Even a datagram that fails RTCP parsing reveals the sender.
    peer_rtcp.send_to(&[0x01, 0x02, 0x03], addr_rtcp).await?;

    let r_addr = timeout(Duration::from_secs(2), stream.get_remote_addr_rtcp())
        .await
        .expect("get_remote_addr_rtcp timed out")?;
    assert_eq!(r_addr, peer_rtcp.local_addr()?);

    stream.close();
    Ok(())
}

#[tokio::test]
async fn test_remote_addr_set_once() -> Result<()> {
    let (stream, peer_rtp, _peer_rtcp, addr_rtp, _) = new_stream_pair().await?;

    let other = UdpSocket::bind("127.0.0.1:0").await?;

    let raw = make_packet(96, 1, 0).marshal()?;
    peer_rtp.send_to(&raw, addr_rtp).await?;

    let first = timeout(Duration::from_secs(2), stream.get_remote_addr_rtp())
        .await
        .expect("get_remote_addr_rtp timed out")?;
    assert_eq!(first, peer_rtp.local_addr()?);

    // A second sender must not displace the learned address.
    let raw = make_packet(96, 2, 160).marshal()?;
    other.send_to(&raw, addr_rtp).await?;

    let mut header = rtp::header::Header::default();
    let mut payload = vec![0u8; INBOUND_MTU];
    timeout(Duration::from_secs(2), stream.read_rtp(&mut header, &mut payload))
        .await
        .expect("read_rtp timed out")?;
    timeout(Duration::from_secs(2), stream.read_rtp(&mut header, &mut payload))
        .await
        .expect("read_rtp timed out")?;

    assert_eq!(stream.get_remote_addr_rtp().await?, first);

    stream.close();
    Ok(())
}
