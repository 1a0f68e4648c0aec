//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready, the reactor
//! turns that into stream events for the connection's echo context, and the
//! context performs the non-blocking read/write syscalls itself.
//! Uses epoll on Linux, kqueue on macOS.

use super::reactor::MioReactor;
use crate::config::{Config, EchoSettings};
use crate::protocols::echo::EchoContext;
use crate::runtime::ConnectionCounter;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);

/// Longest a worker blocks in `poll`, bounding how late it notices shutdown.
const MAX_POLL_WAIT: Duration = Duration::from_millis(100);

/// Run the mio-based server.
pub fn run(config: Config) -> io::Result<()> {
    let num_workers = if config.workers == 0 {
        num_cpus()
    } else {
        config.workers
    };

    let addr: SocketAddr = config
        .listen
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    info!(
        workers = num_workers,
        addr = %addr,
        "Starting mio runtime"
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let mut handles = Vec::with_capacity(num_workers);

    for worker_id in 0..num_workers {
        let config = config.clone();
        let shutdown = Arc::clone(&shutdown);

        let handle = thread::Builder::new()
            .name(format!("worker-{worker_id}"))
            .spawn(move || {
                // SO_REUSEPORT lets the kernel balance accepts across workers
                let result = create_listener_with_reuseport(addr)
                    .and_then(|listener| serve(listener, worker_id, &config, &shutdown));
                if let Err(e) = result {
                    error!(worker = worker_id, error = %e, "Worker failed");
                }
            })?;

        handles.push(handle);
    }

    // Wait for all workers
    for handle in handles {
        let _ = handle.join();
    }

    Ok(())
}

/// Accept and serve echo connections on `listener` until `shutdown` is set.
///
/// Connections still open at shutdown are closed before returning.
pub fn serve(
    listener: std::net::TcpListener,
    worker_id: usize,
    config: &Config,
    shutdown: &AtomicBool,
) -> io::Result<()> {
    let mut poll = Poll::new()?;
    let mut events = Events::with_capacity(config.events_capacity);

    listener.set_nonblocking(true)?;
    let mut listener = TcpListener::from_std(listener);
    poll.registry()
        .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

    let reactor = Rc::new(MioReactor::new(
        poll.registry().try_clone()?,
        config.events_capacity,
    ));
    let connections = ConnectionCounter::new(config.max_connections);

    info!(
        worker = worker_id,
        max_connections = config.max_connections,
        idle_timeout_ms = config.echo.idle_timeout.as_millis() as u64,
        "Worker started"
    );

    let result = loop {
        if shutdown.load(Ordering::Relaxed) {
            break Ok(());
        }

        let timeout = reactor.poll_timeout(MAX_POLL_WAIT);
        if let Err(e) = poll.poll(&mut events, Some(timeout)) {
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            break Err(e);
        }

        for event in events.iter() {
            match event.token() {
                LISTENER_TOKEN => accept_connections(
                    &listener,
                    &reactor,
                    &connections,
                    config.echo,
                    worker_id,
                ),
                _ => reactor.dispatch(event),
            }
        }
        reactor.end_batch();

        reactor.fire_expired_timers();
        reactor.deliver_pending();
    };

    reactor.shutdown();
    info!(
        worker = worker_id,
        remaining = connections.active(),
        "Worker stopped"
    );

    result
}

fn accept_connections(
    listener: &TcpListener,
    reactor: &Rc<MioReactor>,
    connections: &ConnectionCounter,
    settings: EchoSettings,
    worker_id: usize,
) {
    loop {
        match listener.accept() {
            Ok((stream, peer_addr)) => {
                let Some(slot) = connections.try_acquire() else {
                    warn!(
                        worker = worker_id,
                        peer = %peer_addr,
                        max_connections = connections.capacity(),
                        "Connection limit reached"
                    );
                    continue;
                };

                let context = match EchoContext::create(Rc::clone(reactor), stream, settings, slot)
                {
                    Ok(context) => context,
                    Err(e) => {
                        debug!(worker = worker_id, peer = %peer_addr, error = %e, "Failed to create connection");
                        continue;
                    }
                };

                match context.open() {
                    Ok(()) => debug!(
                        worker = worker_id,
                        token = context.inbound_token().map(|t| t.0),
                        peer = %peer_addr,
                        "Accepted connection"
                    ),
                    Err(e) => debug!(
                        worker = worker_id,
                        peer = %peer_addr,
                        error = %e,
                        "Failed to open connection"
                    ),
                }

                // The reactor's registrations own the connection from here on.
                context.release();
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                error!("Accept error: {}", e);
                break;
            }
        }
    }
}

/// Create a TCP listener with SO_REUSEPORT for kernel load balancing.
fn create_listener_with_reuseport(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_port(true)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    Ok(socket.into())
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
