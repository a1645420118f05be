//! Pod connection forwarding
//!
//! Owns the lifecycle of a single port-forward tunnel from an ephemeral local
//! port to one pod's target port, and redirects dials to that local port.
//!
//! A [`PodForwarder`] is built once per resolved address. One long-lived task
//! drives [`PodForwarder::run`], which establishes the tunnel and keeps it
//! alive until its cancellation token fires or the tunnel fails. Any number of
//! tasks may concurrently call [`PodForwarder::dial`]; each waits for the
//! one-shot readiness outcome and then dials the local tunnel endpoint.

use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::{PodlinkError, Result};
use crate::resolver::{resolve_pod_addr, ResolvedTarget};

/// A bidirectional byte stream handed back to dial callers.
pub trait Conn: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Conn for T {}

/// Boxed [`Conn`] trait object.
pub type BoxedConn = Box<dyn Conn>;

/// An established tunnel between a local port and the remote pod port.
pub trait Tunnel: Send {
    /// Proxy bytes until the cancellation token passed to the factory fires
    /// or the tunnel fails on its own.
    fn forward_ports(self: Box<Self>) -> BoxFuture<'static, Result<()>>;
}

/// Allocates an ephemeral local port; invoked exactly once per [`PodForwarder::run`].
///
/// Failures should be reported as [`PodlinkError::PortAllocation`]; they are
/// terminal for the run and surfaced to every blocked dial caller.
pub type EphemeralPortFinder = Box<dyn Fn() -> Result<String> + Send + Sync>;

/// Begins a tunnel for the given pod and `"local:remote"` port mappings.
///
/// The implementation must honor the cancellation token (returning promptly
/// from [`Tunnel::forward_ports`] once it fires) and must fire the ready
/// sender exactly once, if and when the tunnel becomes usable, never before.
/// Failures should be reported as [`PodlinkError::TunnelEstablishment`].
pub type TunnelFactory = Box<
    dyn Fn(
            CancellationToken,
            String,
            String,
            Vec<String>,
            oneshot::Sender<()>,
        ) -> BoxFuture<'static, Result<Box<dyn Tunnel>>>
        + Send
        + Sync,
>;

/// Raw network dial: `(network, address)` to an open connection.
pub type DialerFunc =
    Box<dyn Fn(String, String) -> BoxFuture<'static, Result<BoxedConn>> + Send + Sync>;

/// One-shot readiness outcome shared between the run task and dial callers.
#[derive(Debug, Clone)]
enum ReadyState {
    Pending,
    Ready { local_port: String },
    Failed(PodlinkError),
}

impl ReadyState {
    fn is_pending(&self) -> bool {
        matches!(self, ReadyState::Pending)
    }
}

/// Forwards connections to a single pod behind a synthetic
/// `<name>.<namespace>.pod.cluster.local:<port>` address.
pub struct PodForwarder {
    target: ResolvedTarget,
    network: String,
    port_finder: EphemeralPortFinder,
    tunnel_factory: TunnelFactory,
    dialer: DialerFunc,
    ready: watch::Sender<ReadyState>,
    started: AtomicBool,
}

impl PodForwarder {
    /// Create a forwarder for the given network kind and synthetic address
    ///
    /// The address must resolve to a pod identity and carry a target port.
    /// The default ephemeral-port finder and TCP dialer are installed; tests
    /// replace them through [`with_port_finder`](Self::with_port_finder) and
    /// [`with_dialer`](Self::with_dialer).
    pub fn new(network: &str, addr: &str, tunnel_factory: TunnelFactory) -> Result<Self> {
        let target = resolve_pod_addr(addr)?;
        if target.target_port.is_empty() {
            return Err(PodlinkError::Forwarder(format!(
                "address {} is missing a target port",
                addr
            )));
        }

        let (ready, _) = watch::channel(ReadyState::Pending);

        Ok(Self {
            target,
            network: network.to_string(),
            port_finder: default_port_finder(),
            tunnel_factory,
            dialer: default_dialer(),
            ready,
            started: AtomicBool::new(false),
        })
    }

    /// Replace the ephemeral-port finder
    pub fn with_port_finder(mut self, finder: EphemeralPortFinder) -> Self {
        self.port_finder = finder;
        self
    }

    /// Replace the raw dialer
    pub fn with_dialer(mut self, dialer: DialerFunc) -> Self {
        self.dialer = dialer;
        self
    }

    /// The resolved target this forwarder serves
    pub fn target(&self) -> &ResolvedTarget {
        &self.target
    }

    /// Establish the tunnel and keep it alive until `shutdown` fires or the
    /// tunnel fails
    ///
    /// May be called at most once per instance; a second call fails without
    /// touching the tunnel. Every failure path resolves the readiness state,
    /// so a dial caller blocked on this forwarder is always released.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(PodlinkError::Forwarder(
                "run may only be called once per forwarder".to_string(),
            ));
        }

        let local_port = match (self.port_finder)() {
            Ok(port) => port,
            Err(err) => {
                self.resolve_ready(ReadyState::Failed(err.clone()));
                warn!(error = %err, "Ephemeral port allocation failed");
                return Err(err);
            }
        };

        // The local port must be known before the tunnel is requested: it is
        // part of the port-mapping spec handed to the factory.
        let ports = vec![format!("{}:{}", local_port, self.target.target_port)];
        debug!(
            namespace = %self.target.pod.namespace,
            pod = %self.target.pod.name,
            ports = ?ports,
            "Starting port-forward tunnel"
        );

        let (ready_tx, ready_rx) = oneshot::channel();
        let factory_result = (self.tunnel_factory)(
            shutdown.clone(),
            self.target.pod.namespace.clone(),
            self.target.pod.name.clone(),
            ports,
            ready_tx,
        )
        .await;

        let tunnel = match factory_result {
            Ok(tunnel) => tunnel,
            Err(err) => {
                self.resolve_ready(ReadyState::Failed(err.clone()));
                warn!(error = %err, "Tunnel establishment failed");
                return Err(err);
            }
        };

        let mut forward = tunnel.forward_ports();

        // Race the forward loop against the ready signal. Readiness is a side
        // effect of the tunnel implementation; the forwarder only observes it.
        tokio::select! {
            result = &mut forward => return self.finish(result),
            signal = ready_rx => {
                if signal.is_ok() {
                    debug!(local_port = %local_port, "Tunnel ready");
                    self.resolve_ready(ReadyState::Ready { local_port });
                }
                // A dropped sender means the tunnel gave up on signaling
                // readiness; the forward loop's exit releases the waiters.
            }
        }

        let result = forward.await;
        self.finish(result)
    }

    /// Wait for tunnel readiness, then dial the local tunnel endpoint
    ///
    /// `cancel` bounds how long this one call waits for readiness and for the
    /// dial itself; it has no effect on the tunnel. Concurrent callers all
    /// observe the same terminal readiness outcome.
    pub async fn dial(&self, cancel: &CancellationToken) -> Result<BoxedConn> {
        let mut ready = self.ready.subscribe();

        let state = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(PodlinkError::DialCanceled(
                    "canceled while waiting for tunnel readiness".to_string(),
                ));
            }
            changed = ready.wait_for(|state| !state.is_pending()) => match changed {
                Ok(state) => state.clone(),
                // Unreachable while the forwarder is alive, it holds the sender.
                Err(_) => {
                    return Err(PodlinkError::TunnelTerminated(
                        "forwarder dropped before tunnel became ready".to_string(),
                    ));
                }
            },
        };

        match state {
            ReadyState::Ready { local_port } => {
                let address = format!("127.0.0.1:{}", local_port);
                debug!(address = %address, "Dialing forwarded pod port");
                tokio::select! {
                    _ = cancel.cancelled() => Err(PodlinkError::DialCanceled(
                        "canceled during dial".to_string(),
                    )),
                    conn = (self.dialer)(self.network.clone(), address) => conn,
                }
            }
            ReadyState::Failed(err) => Err(err),
            // wait_for only yields resolved states; guard anyway rather than panic.
            ReadyState::Pending => Err(PodlinkError::Forwarder(
                "readiness observed before it was resolved".to_string(),
            )),
        }
    }

    /// Map the forward loop's exit into `run`'s result and release any dial
    /// caller still waiting on readiness.
    fn finish(&self, result: Result<()>) -> Result<()> {
        match result {
            Ok(()) => {
                self.resolve_ready(ReadyState::Failed(PodlinkError::TunnelTerminated(
                    "tunnel closed before becoming ready".to_string(),
                )));
                debug!(
                    namespace = %self.target.pod.namespace,
                    pod = %self.target.pod.name,
                    "Port-forward tunnel closed"
                );
                Ok(())
            }
            Err(e) => {
                let err = match e {
                    PodlinkError::TunnelTerminated(_) => e,
                    other => PodlinkError::TunnelTerminated(other.to_string()),
                };
                self.resolve_ready(ReadyState::Failed(err.clone()));
                warn!(error = %err, "Port-forward tunnel terminated");
                Err(err)
            }
        }
    }

    /// One-shot transition out of `Pending`; later calls are no-ops.
    fn resolve_ready(&self, state: ReadyState) {
        self.ready.send_if_modified(|current| {
            if current.is_pending() {
                *current = state;
                true
            } else {
                false
            }
        });
    }
}

/// Default ephemeral port discovery: bind port 0 and let the OS pick
///
/// The listener is dropped immediately so the port is free again by the time
/// the tunnel binds it.
pub fn default_port_finder() -> EphemeralPortFinder {
    Box::new(|| {
        let listener = TcpListener::bind("127.0.0.1:0")
            .map_err(|e| PodlinkError::PortAllocation(format!("failed to bind: {}", e)))?;

        let port = listener
            .local_addr()
            .map_err(|e| {
                PodlinkError::PortAllocation(format!("failed to read local address: {}", e))
            })?
            .port();

        Ok(port.to_string())
    })
}

/// Default raw dialer: plain TCP against the forwarded local endpoint
pub fn default_dialer() -> DialerFunc {
    Box::new(|network, address| {
        Box::pin(async move {
            if network != "tcp" {
                return Err(PodlinkError::Connection(format!(
                    "unsupported network kind: {}",
                    network
                )));
            }

            let stream = TcpStream::connect(&address).await.map_err(|e| {
                PodlinkError::Connection(format!("failed to dial {}: {}", address, e))
            })?;

            Ok(Box::new(stream) as BoxedConn)
        })
    })
}
