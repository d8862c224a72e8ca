use std::{net::SocketAddr, sync::Arc, time::Duration};

use super::error::Error;

/// Name every host and client certificate is issued for.
pub const SERVER_NAME: &str = "torus";

/// Creates a QUIC endpoint on `addr` that both accepts and opens connections.
///
/// Each endpoint presents a fresh self-signed certificate and does not check
/// the certificates of the endpoints it connects to: the nodes of a run are
/// assumed to trust each other.
pub fn bind(addr: SocketAddr) -> Result<quinn::Endpoint, Error> {
    let (client_tls, server_tls) = tls_config()?;

    // shared transport configuration for the server and client sides
    // this is the default config with the BBR congestion controller enabled
    let mut transport_config = quinn::TransportConfig::default();
    let bbr_config = quinn::congestion::BbrConfig::default();
    transport_config.congestion_controller_factory(Arc::new(bbr_config));
    // a paused run can be idle for as long as the user likes
    transport_config.keep_alive_interval(Some(Duration::from_secs(1)));
    let transport_config = Arc::new(transport_config);

    let mut server_config =
        quinn::ServerConfig::with_crypto(Arc::new(server_tls));
    server_config.transport_config(transport_config.clone());

    let mut client_config = quinn::ClientConfig::new(Arc::new(client_tls));
    client_config.transport_config(transport_config);

    let mut endpoint = quinn::Endpoint::server(server_config, addr)?;
    endpoint.set_default_client_config(client_config);
    Ok(endpoint)
}

fn tls_config() -> Result<(rustls::ClientConfig, rustls::ServerConfig), Error> {
    let cert = rcgen::generate_simple_self_signed(vec![SERVER_NAME.into()])?;
    let key = rustls::PrivateKey(cert.serialize_private_key_der());
    let cert = rustls::Certificate(cert.serialize_der()?);

    let client_config = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_custom_certificate_verifier(Arc::new(SkipServerVerification))
        .with_no_client_auth();

    let server_config = rustls::ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(vec![cert], key)?;

    Ok((client_config, server_config))
}

struct SkipServerVerification;

impl rustls::client::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::Certificate,
        _intermediates: &[rustls::Certificate],
        _server_name: &rustls::ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> Result<rustls::client::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::ServerCertVerified::assertion())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{link, wire::Frame};

    #[tokio::test]
    async fn endpoints_exchange_frames() {
        let server = bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let client = bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = server.local_addr().unwrap();

        let accepting = tokio::spawn(async move {
            let conn = server.accept().await.unwrap().await.unwrap();
            let (mut send, mut recv) = link::accept(&conn).await.unwrap();
            let frame = recv.expect().await.unwrap();
            send.send(&frame).await.unwrap();
            send.finish().await.unwrap();
            assert!(recv.recv().await.unwrap().is_none());
        });

        let conn = client.connect(addr, SERVER_NAME).unwrap().await.unwrap();
        let (mut send, mut recv) = link::open(&conn).await.unwrap();
        send.send(&Frame::Ready(7)).await.unwrap();
        assert_eq!(recv.expect().await.unwrap(), Frame::Ready(7));
        send.finish().await.unwrap();
        assert!(recv.recv().await.unwrap().is_none());
        accepting.await.unwrap();
    }
}
