use std::{net::SocketAddr, sync::Arc, time::Duration, time::SystemTime};

use rustls::{
    client::{ServerCertVerified, ServerCertVerifier},
    Certificate as RustlsCert, PrivateKey, ServerName,
};
use tokio::task::JoinSet;
use tracing::{debug, debug_span, info, warn, Instrument};

use super::{
    frame::{FrameRecvStream, FrameSendStream},
    link::Link,
    shutdown::Shutdown,
    Service, SERVER_NAME,
};
use crate::error::{Error, Result};

/// A QUIC endpoint that serves incoming calls and dials other nodes from the
/// same socket.
///
/// Can be cloned to obtain another handle to the same endpoint.
#[derive(Clone)]
pub struct Endpoint {
    ep: quinn::Endpoint,
    connect_timeout: Duration,
}

impl Endpoint {
    /// Binds a new endpoint to `addr` with a freshly generated self-signed
    /// certificate.
    pub fn bind(addr: SocketAddr, connect_timeout: Duration) -> Result<Self> {
        let (client_tls, server_tls) = Self::tls_config()?;

        // shared transport configuration for the server and client sides
        // this is the default config with the BBR congestion controller enabled
        let mut transport_config = quinn::TransportConfig::default();
        let bbr_config = quinn::congestion::BbrConfig::default();
        transport_config.congestion_controller_factory(Arc::new(bbr_config));
        transport_config.keep_alive_interval(Some(Duration::from_secs(1)));
        let transport_config = Arc::new(transport_config);

        let mut server_config =
            quinn::ServerConfig::with_crypto(Arc::new(server_tls));
        server_config.transport_config(transport_config.clone());

        let mut client_config = quinn::ClientConfig::new(Arc::new(client_tls));
        client_config.transport_config(transport_config);

        let mut ep = quinn::Endpoint::server(server_config, addr)?;
        ep.set_default_client_config(client_config);
        debug!(addr = %ep.local_addr()?, "endpoint bound");
        Ok(Self {
            ep,
            connect_timeout,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.ep.local_addr()?)
    }

    /// Dials `remote`. Any failure, including running out of time, is
    /// reported as [`Error::Connection`].
    pub async fn connect(&self, remote: SocketAddr) -> Result<Link> {
        let dial = async {
            let conn = self.ep.connect(remote, SERVER_NAME)?.await?;
            Ok::<_, Error>(conn)
        };
        match tokio::time::timeout(self.connect_timeout, dial).await {
            Ok(Ok(conn)) => {
                debug!(%remote, "connected via QUIC");
                Ok(Link::new(conn, remote))
            }
            Ok(Err(e)) => Err(Error::Connection(format!("{}: {}", remote, e))),
            Err(_) => Err(Error::Connection(format!(
                "{}: no answer within {:?}",
                remote, self.connect_timeout
            ))),
        }
    }

    /// Accepts connections and answers calls with `service` until `shutdown`
    /// is triggered. In-flight calls are drained before the endpoint closes.
    pub async fn serve<S: Service>(&self, service: Arc<S>, shutdown: Shutdown) {
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                incoming = self.ep.accept() => {
                    let Some(in_progress) = incoming else { break };
                    let service = service.clone();
                    let shutdown = shutdown.clone();
                    connections.spawn(Self::handle_connection(
                        in_progress,
                        service,
                        shutdown,
                    ));
                }
                _ = shutdown.wait() => break,
            }
        }
        while connections.join_next().await.is_some() {}
        self.ep.close(0u32.into(), b"shutdown");
        self.ep.wait_idle().await;
        info!("endpoint closed");
    }

    /// Answers every stream opened on one connection until it closes or the
    /// node shuts down.
    async fn handle_connection<S: Service>(
        in_progress: quinn::Connecting,
        service: Arc<S>,
        shutdown: Shutdown,
    ) {
        let remote = in_progress.remote_address();
        let span = debug_span!("connection", %remote);
        async move {
            let conn = match in_progress.await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("handshake failed: {}", e);
                    return;
                }
            };
            debug!("accepted");
            let mut calls = JoinSet::new();
            loop {
                tokio::select! {
                    stream = conn.accept_bi() => match stream {
                        Ok((tx, rx)) => {
                            calls.spawn(Self::answer(service.clone(), tx, rx));
                        }
                        Err(e) => {
                            debug!("connection ended: {}", e);
                            break;
                        }
                    },
                    _ = shutdown.wait() => break,
                }
            }
            while let Some(call) = calls.join_next().await {
                if let Ok(Err(e)) = call {
                    warn!("call failed: {}", e);
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn answer<S: Service>(
        service: Arc<S>,
        raw_tx: quinn::SendStream,
        raw_rx: quinn::RecvStream,
    ) -> Result<()> {
        let mut tx = FrameSendStream::new(raw_tx);
        let mut rx = FrameRecvStream::new(raw_rx);
        let request = rx.receive::<S::Request>().await?;
        let response = service.handle(request).await;
        tx.send(&response).await?;
        tx.finish().await
    }

    /// Returns rustls configurations built around a throwaway self-signed
    /// certificate. Cluster nodes run on a trusted network, so clients accept
    /// any server certificate and TLS only provides QUIC's encryption.
    fn tls_config() -> Result<(rustls::ClientConfig, rustls::ServerConfig)> {
        let cert = rcgen::generate_simple_self_signed(vec![SERVER_NAME.into()])?;
        let key = PrivateKey(cert.serialize_private_key_der());
        let cert = RustlsCert(cert.serialize_der()?);

        let client_config = rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
            .with_no_client_auth();

        let server_config = rustls::ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(vec![cert], key)?;

        Ok((client_config, server_config))
    }
}

struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &RustlsCert,
        _intermediates: &[RustlsCert],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}
