use super::*;

use tokio::net::UdpSocket;
use tokio::time::timeout;
use util::Marshal;

use crate::codec::g711;
use crate::stream::UdpStream;

async fn provider_pair(
    payload_type: u8,
    clock_rate: u32,
) -> Result<(RtpSampleProvider, Arc<UdpStream>, UdpSocket, std::net::SocketAddr)> {
    let conn_rtp = Arc::new(UdpSocket::bind("127.0.0.1:0").await?);
    let conn_rtcp = Arc::new(UdpSocket::bind("127.0.0.1:0").await?);
    let addr_rtp = conn_rtp.local_addr()?;

    let peer = UdpSocket::bind("127.0.0.1:0").await?;

    let stream = UdpStream::new(conn_rtp, conn_rtcp);
    let provider = RtpSampleProvider::new(Arc::clone(&stream), payload_type, clock_rate, 1)?;

    Ok((provider, stream, peer, addr_rtp))
}

async fn send_packet(
    peer: &UdpSocket,
    addr: std::net::SocketAddr,
    payload_type: u8,
    sequence_number: u16,
    payload: Vec<u8>,
) -> Result<()> {
    let pkt = rtp::packet::Packet {
        header: rtp::header::Header {
            version: 2,
            payload_type,
            sequence_number,
            timestamp: sequence_number as u32 * 160,
            ssrc: 0xabcd,
            ..Default::default()
        },
        payload: Bytes::from(payload),
    };

    peer.send_to(&pkt.marshal()?, addr).await?;
    Ok(())
}

#[tokio::test]
async fn test_pcma_transcoded_to_opus() -> Result<()> {
    let (mut provider, stream, peer, addr) = provider_pair(8, 8000).await?;

    // One 20 ms A-law frame.
    let pcm: Vec<i16> = (0..160).map(|i| ((i * 211) % 8000 - 4000) as i16).collect();
    let mut alaw = vec![0u8; 160];
    g711::encode_alaw(&pcm, &mut alaw);

    send_packet(&peer, addr, 8, 1, alaw).await?;

    let sample = timeout(Duration::from_secs(2), provider.next_sample())
        .await
        .expect("next_sample timed out")?;

    assert_eq!(sample.duration, Duration::from_millis(20));
    assert!(!sample.data.is_empty());

    // The payload must be a decodable Opus frame of the same length.
    let mut decoder = opus::Decoder::new(8000, opus::Channels::Mono)?;
    let mut decoded = vec![0i16; 960];
    let n = decoder.decode(&sample.data, &mut decoded, false)?;
    assert_eq!(n, 160);

    stream.close();
    Ok(())
}

#[tokio::test]
async fn test_dynamic_payload_passthrough() -> Result<()> {
    let (mut provider, stream, peer, addr) = provider_pair(96, 48000).await?;

    let payload = vec![0x11u8, 0x22, 0x33, 0x44, 0x55];
    send_packet(&peer, addr, 96, 1, payload.clone()).await?;

    let sample = timeout(Duration::from_secs(2), provider.next_sample())
        .await
        .expect("next_sample timed out")?;

    assert_eq!(&sample.data[..], &payload[..]);

    stream.close();
    Ok(())
}

#[tokio::test]
async fn test_payload_type_mismatch_is_tolerated() -> Result<()> {
    // Negotiated PCMU, but the peer sends PCMA: the provider warns and
    // dispatches on what actually arrived.
    let (mut provider, stream, peer, addr) = provider_pair(0, 8000).await?;

    let mut alaw = vec![0u8; 160];
    g711::encode_alaw(&[0i16; 160], &mut alaw);
    send_packet(&peer, addr, 8, 1, alaw).await?;

    let sample = timeout(Duration::from_secs(2), provider.next_sample())
        .await
        .expect("next_sample timed out")?;
    assert!(!sample.data.is_empty());

    stream.close();
    Ok(())
}

#[tokio::test]
async fn test_unsupported_observed_payload_type() -> Result<()> {
    let (mut provider, stream, peer, addr) = provider_pair(96, 48000).await?;

    send_packet(&peer, addr, 50, 1, vec![0u8; 16]).await?;

    let res = timeout(Duration::from_secs(2), provider.next_sample())
        .await
        .expect("next_sample timed out");
    assert!(matches!(res, Err(Error::ErrUnsupportedPayloadType)));

    stream.close();
    Ok(())
}

#[tokio::test]
async fn test_next_sample_reports_eof_after_close() -> Result<()> {
    let (mut provider, stream, _peer, _addr) = provider_pair(96, 48000).await?;

    stream.close();

    let res = timeout(Duration::from_secs(2), provider.next_sample())
        .await
        .expect("next_sample must not hang after close");
    assert!(matches!(res, Err(Error::ErrStreamClosed)));

    Ok(())
}
