//! Port reconciliation
//!
//! A pass compares the desired port set against the currently bound
//! listeners and performs the minimal closes and opens to converge.
//! Ports in both sets keep their listener untouched. Callers serialize
//! passes; this module never assumes exclusive access beyond one pass.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};

use futures::future::{join_all, BoxFuture};

use crate::error::Error;
use crate::server::demux::AcceptStrategy;
use crate::server::listener::{self, Listener};
use crate::server::{lock, probe};
use crate::Result;

/// Everything one reconciliation pass needs from the server.
pub(crate) struct ReconcileContext<'a> {
    pub(crate) host: IpAddr,
    pub(crate) use_available_port: bool,
    pub(crate) strategy: Arc<AcceptStrategy>,
    pub(crate) bound: &'a Mutex<BTreeMap<u16, Listener>>,
}

/// Converge the bound listeners onto `desired`.
///
/// Surplus listeners are closed first and every missing port is then
/// opened; binds that succeed are recorded even when the pass as a
/// whole fails, so partial convergence stays observable. A `PortInUse`
/// failure turns into a forward scan and a retry pass with the
/// substitute swapped in when the context allows it.
///
/// Returns the port list that actually converged, with any substitutes
/// in the position of the port they replaced.
pub(crate) fn reconcile<'a>(
    context: &'a ReconcileContext<'a>,
    desired: Vec<u16>,
) -> BoxFuture<'a, Result<Vec<u16>>> {
    Box::pin(async move {
        tracing::debug!(ports = ?desired, "reconciling listeners");
        close_surplus(context, &desired).await;

        let to_open: Vec<u16> = {
            let bound = lock(context.bound);
            desired
                .iter()
                .copied()
                .filter(|port| !bound.contains_key(port))
                .collect()
        };

        // Attempt every missing port; record all successes before
        // acting on any failure.
        let attempts = join_all(
            to_open
                .into_iter()
                .map(|port| async move { (port, open(context, port)) }),
        )
        .await;

        let mut first_error = None;
        for (port, outcome) in attempts {
            match outcome {
                Ok(bound) => {
                    lock(context.bound).insert(port, bound);
                }
                Err(error) => {
                    tracing::warn!(port, %error, "failed to bind port");
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                }
            }
        }

        match first_error {
            None => Ok(desired),
            Some(Error::PortInUse { port }) if context.use_available_port => {
                let substitute = substitute_for(port, &desired).await?;
                tracing::warn!(port, substitute, "port in use; rebinding on next available");
                let amended = desired
                    .iter()
                    .map(|&p| if p == port { substitute } else { p })
                    .collect();
                reconcile(context, amended).await
            }
            Some(error) => Err(error),
        }
    })
}

/// Close every bound listener whose port is not desired, waiting until
/// each socket is released.
async fn close_surplus(context: &ReconcileContext<'_>, desired: &[u16]) {
    let surplus: Vec<Listener> = {
        let mut bound = lock(context.bound);
        let ports: Vec<u16> = bound
            .keys()
            .copied()
            .filter(|port| !desired.contains(port))
            .collect();
        ports.iter().filter_map(|port| bound.remove(port)).collect()
    };
    if surplus.is_empty() {
        return;
    }
    join_all(surplus.into_iter().map(Listener::close)).await;
}

/// Bind one port and start its accept loop.
fn open(context: &ReconcileContext<'_>, port: u16) -> Result<Listener> {
    let addr = SocketAddr::new(context.host, port);
    match listener::bind(addr) {
        Ok(socket) => Ok(Listener::spawn(
            port,
            socket,
            Arc::clone(&context.strategy),
        )),
        Err(error) if error.kind() == std::io::ErrorKind::AddrInUse => {
            Err(Error::PortInUse { port })
        }
        Err(source) => Err(Error::Bind { port, source }),
    }
}

/// Find a free port to stand in for `conflict`, skipping ports the
/// desired list already claims so two entries never converge onto the
/// same substitute.
async fn substitute_for(conflict: u16, claimed: &[u16]) -> Result<u16> {
    let mut candidate = conflict;
    loop {
        candidate = probe::first_available(candidate).await?;
        if !claimed.contains(&candidate) {
            return Ok(candidate);
        }
        candidate = candidate
            .checked_add(1)
            .ok_or(Error::PortInUse { port: candidate })?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Dispatcher;
    use crate::tls::TlsMaterial;
    use std::net::Ipv4Addr;

    fn test_strategy() -> Arc<AcceptStrategy> {
        let tls = TlsMaterial::generate().unwrap();
        Arc::new(AcceptStrategy::new(tls.acceptor(), Arc::new(Dispatcher::new())))
    }

    fn test_context(bound: &Mutex<BTreeMap<u16, Listener>>) -> ReconcileContext<'_> {
        ReconcileContext {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            use_available_port: false,
            strategy: test_strategy(),
            bound,
        }
    }

    /// Distinct ports that are free at the time of the call.
    fn free_ports(count: usize) -> Vec<u16> {
        let holders: Vec<std::net::TcpListener> = (0..count)
            .map(|_| std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap())
            .collect();
        holders
            .iter()
            .map(|holder| holder.local_addr().unwrap().port())
            .collect()
    }

    fn bound_ports(bound: &Mutex<BTreeMap<u16, Listener>>) -> Vec<u16> {
        lock(bound).keys().copied().collect()
    }

    fn listener_id(bound: &Mutex<BTreeMap<u16, Listener>>, port: u16) -> Option<u64> {
        lock(bound).get(&port).map(Listener::id)
    }

    #[tokio::test]
    async fn test_converges_to_desired_set() {
        let ports = free_ports(2);
        let bound = Mutex::new(BTreeMap::new());
        let context = test_context(&bound);

        let converged = reconcile(&context, ports.clone()).await.unwrap();

        assert_eq!(converged, ports);
        let mut expected = ports;
        expected.sort_unstable();
        assert_eq!(bound_ports(&bound), expected);
    }

    #[tokio::test]
    async fn test_shared_port_keeps_its_listener() {
        let ports = free_ports(3);
        let (first, kept, third) = (ports[0], ports[1], ports[2]);
        let bound = Mutex::new(BTreeMap::new());
        let context = test_context(&bound);

        reconcile(&context, vec![first, kept]).await.unwrap();
        let kept_id = listener_id(&bound, kept).unwrap();

        reconcile(&context, vec![kept, third]).await.unwrap();

        assert!(listener_id(&bound, first).is_none());
        assert!(listener_id(&bound, third).is_some());
        assert_eq!(listener_id(&bound, kept), Some(kept_id));
    }

    #[tokio::test]
    async fn test_idempotent_pass_touches_nothing() {
        let ports = free_ports(1);
        let bound = Mutex::new(BTreeMap::new());
        let context = test_context(&bound);

        reconcile(&context, ports.clone()).await.unwrap();
        let id = listener_id(&bound, ports[0]).unwrap();

        let converged = reconcile(&context, ports.clone()).await.unwrap();

        assert_eq!(converged, ports);
        assert_eq!(listener_id(&bound, ports[0]), Some(id));
    }

    #[tokio::test]
    async fn test_empty_desired_closes_everything() {
        let ports = free_ports(2);
        let bound = Mutex::new(BTreeMap::new());
        let context = test_context(&bound);

        reconcile(&context, ports).await.unwrap();
        let converged = reconcile(&context, Vec::new()).await.unwrap();

        assert!(converged.is_empty());
        assert!(bound_ports(&bound).is_empty());
    }

    #[tokio::test]
    async fn test_conflict_without_substitution_is_fatal_but_partial() {
        let free = free_ports(1)[0];
        let holder = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let busy = holder.local_addr().unwrap().port();
        let bound = Mutex::new(BTreeMap::new());
        let context = test_context(&bound);

        let error = reconcile(&context, vec![free, busy]).await.unwrap_err();

        match error {
            Error::PortInUse { port } => assert_eq!(port, busy),
            other => panic!("unexpected error: {other}"),
        }
        // The bind that succeeded stays bound.
        assert_eq!(bound_ports(&bound), vec![free]);
    }

    #[tokio::test]
    async fn test_conflict_with_substitution_rebinds_forward() {
        let holder = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let busy = holder.local_addr().unwrap().port();
        let bound = Mutex::new(BTreeMap::new());
        let mut context = test_context(&bound);
        context.use_available_port = true;

        let converged = reconcile(&context, vec![busy]).await.unwrap();

        assert_eq!(converged.len(), 1);
        let substitute = converged[0];
        assert!(substitute > busy);
        assert_eq!(bound_ports(&bound), vec![substitute]);
    }

    #[tokio::test]
    async fn test_substitute_skips_claimed_ports() {
        let holder = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let busy = holder.local_addr().unwrap().port();
        // The next port up is free but claimed by the desired list, so
        // the scan must pass over it.
        let claimed = [busy, busy + 1];

        let substitute = substitute_for(busy, &claimed).await.unwrap();

        assert!(substitute > busy + 1);
        assert!(!claimed.contains(&substitute));
    }
}
