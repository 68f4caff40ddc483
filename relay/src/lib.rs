//! Wires together `relay-reactor` (listeners, TLS, resolver), `relay-queue`
//! and `relay-queue-fs` (the on-disk mail queue), `relay-client` (outbound
//! delivery), `relay-server` (the inbound SMTP protocol) and `relay-dnsbl`
//! into a single running daemon.

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use smol::future::FutureExt;
use tracing::{debug, info, trace, warn};

mod config;
mod transport;

use config::{dnsbl_check, RelayConfig};
use transport::{ClientConfig, ClientTransport};

#[derive(structopt::StructOpt)]
#[structopt(
    name = "relay",
    about = "A highly configurable SMTP relay written in Rust."
)]
pub struct Opt {
    /// Address or `fd#N` spec to listen on; may be repeated. Defaults to
    /// `0.0.0.0:25` and `[::]:25` when empty.
    #[structopt(long = "listen")]
    pub listen: Vec<String>,

    /// Hostname this relay identifies itself as in the banner and `EHLO`.
    #[structopt(long, default_value = "localhost")]
    pub hostname: String,

    /// Directory backing the on-disk mail queue.
    #[structopt(long, parse(from_os_str), default_value = "/var/spool/relay")]
    pub queue_dir: PathBuf,

    /// Path to a PEM certificate chain, for `STARTTLS`. Requires `--tls-key`.
    #[structopt(long, parse(from_os_str))]
    pub tls_cert: Option<PathBuf>,

    /// Path to the PEM private key matching `--tls-cert`.
    #[structopt(long, parse(from_os_str))]
    pub tls_key: Option<PathBuf>,

    /// A dnsbl config string (see `relay_dnsbl::Config::parse`); may be
    /// repeated to check against multiple zones.
    #[structopt(long = "dnsbl")]
    pub dnsbl: Vec<String>,
}

pub fn run(opt: &Opt, shutdown: smol::channel::Receiver<()>) -> anyhow::Result<()> {
    info!("relay starting up");

    let acceptor = match (&opt.tls_cert, &opt.tls_key) {
        (Some(cert), Some(key)) => {
            let cfg = relay_reactor::tls::load_server_config(cert, key)
                .context("loading the TLS server configuration")?;
            Some(relay_reactor::tls::acceptor(cfg))
        }
        (None, None) => None,
        _ => anyhow::bail!("--tls-cert and --tls-key must be given together"),
    };

    let dnsbl = opt
        .dnsbl
        .iter()
        .map(|s| relay_dnsbl::Config::parse(s).with_context(|| format!("parsing dnsbl config {:?}", s)))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let specs = if opt.listen.is_empty() {
        relay_reactor::listener::default_specs()
    } else {
        opt.listen
            .iter()
            .map(|s| {
                relay_reactor::listener::parse_spec(s)
                    .with_context(|| format!("parsing listener spec {:?}", s))
            })
            .collect::<anyhow::Result<Vec<_>>>()?
    };

    smol::block_on(async move {
        let resolver = async_std_resolver::resolver_from_system_conf()
            .await
            .context("configuring a resolver from system configuration")?;

        let storage = Arc::new(
            relay_queue_fs::FsStorage::new(opt.queue_dir.clone())
                .await
                .context("opening the queue storage folder")?,
        );

        let client = Arc::new(relay_client::Client::new(
            resolver.clone(),
            Arc::new(ClientConfig {
                hostname: opt.hostname.clone(),
            }),
        ));
        let transport = Arc::new(ClientTransport {
            client,
            resolver: resolver.clone(),
        });

        smol::Task::spawn(relay_queue::run(storage.clone(), transport.clone())).detach();

        let server_cfg = Arc::new(RelayConfig {
            hostname: opt.hostname.clone(),
            storage,
            transport,
            acceptor,
            dnsbl,
        });

        let mut listeners = Vec::new();
        for spec in &specs {
            listeners.push(
                relay_reactor::listener::bind(spec)
                    .await
                    .with_context(|| format!("binding listener {:?}", spec))?,
            );
        }

        info!(count = listeners.len(), "server up, waiting for connections");
        let accept_tasks: Vec<_> = listeners
            .into_iter()
            .map(|listener| {
                let server_cfg = server_cfg.clone();
                let shutdown = shutdown.clone();
                smol::Task::spawn(accept_loop(listener, server_cfg, shutdown))
            })
            .collect();

        for task in accept_tasks {
            task.await;
        }

        Ok(())
    })
}

async fn accept_loop<C, P>(
    listener: smol::net::TcpListener,
    cfg: Arc<RelayConfig<C, P>>,
    shutdown: smol::channel::Receiver<()>,
) where
    C: 'static + Send + Sync + trust_dns_resolver::proto::DnsHandle<Error = trust_dns_resolver::error::ResolveError>,
    P: 'static + Send + Sync + trust_dns_resolver::ConnectionProvider<Conn = C>,
{
    loop {
        let accepted = async { Some(listener.accept().await) }
            .or(async {
                let _ = shutdown.recv().await;
                None
            })
            .await;
        let (stream, peer) = match accepted {
            Some(Ok(pair)) => pair,
            Some(Err(e)) => {
                warn!(error = %e, "failed to accept incoming connection");
                continue;
            }
            None => return,
        };
        let cfg = cfg.clone();
        smol::Task::spawn(handle_connection(stream, peer, cfg)).detach();
    }
}

async fn handle_connection<C, P>(
    stream: smol::net::TcpStream,
    peer: SocketAddr,
    cfg: Arc<RelayConfig<C, P>>,
) where
    C: 'static + Send + Sync + trust_dns_resolver::proto::DnsHandle<Error = trust_dns_resolver::error::ResolveError>,
    P: 'static + Send + Sync + trust_dns_resolver::ConnectionProvider<Conn = C>,
{
    trace!(%peer, "accepted connection");
    if !dnsbl_check(&cfg.dnsbl, peer).await {
        debug!(%peer, "connection denied by dnsbl");
        return;
    }
    if let Err(e) = relay_server::interact(stream, relay_server::IsAlreadyTls::No, peer, cfg).await
    {
        warn!(%peer, error = %e, "connection ended with an error");
    }
}
