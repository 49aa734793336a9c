//! Fixed-size pool of node sessions with borrow/return discipline.
//!
//! A [`PooledConnection`] is an exclusive guard: dropping it hands the
//! session back, so every exit path of a borrower releases what it took.

use std::ops::Deref;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

use crate::error::CoreError;
use crate::rpc::NodeRpc;

struct PoolInner {
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<Arc<dyn NodeRpc>>>,
    sessions: Vec<Arc<dyn NodeRpc>>,
    in_flight: watch::Sender<usize>,
}

impl PoolInner {
    fn give_back(&self, session: Arc<dyn NodeRpc>) {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(session);
        self.in_flight.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Pool of independent node sessions. Cloning shares the pool.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    pub fn new(sessions: Vec<Arc<dyn NodeRpc>>) -> Self {
        let (in_flight, _) = watch::channel(0);
        Self {
            inner: Arc::new(PoolInner {
                permits: Arc::new(Semaphore::new(sessions.len())),
                idle: Mutex::new(sessions.clone()),
                sessions,
                in_flight,
            }),
        }
    }

    pub fn size(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.permits.is_closed()
    }

    /// Borrow a session, waiting until one is free.
    ///
    /// Fails only with [`CoreError::PoolClosed`] once shutdown has begun.
    pub async fn acquire(&self) -> Result<PooledConnection, CoreError> {
        let permit = Arc::clone(&self.inner.permits)
            .acquire_owned()
            .await
            .map_err(|_| CoreError::PoolClosed)?;

        // One permit per idle session, so holding a permit guarantees one.
        let session = self
            .inner
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .ok_or(CoreError::PoolClosed)?;
        self.inner.in_flight.send_modify(|n| *n += 1);

        Ok(PooledConnection {
            session,
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }

    /// Return a session. Equivalent to dropping the guard.
    pub fn release(&self, conn: PooledConnection) {
        drop(conn);
    }

    /// Refuse new borrowers, wait for outstanding handles to come back, then
    /// close every session.
    ///
    /// Returns [`CoreError::ShutdownTimeout`] when handles are still out at
    /// `deadline`; sessions are left open in that case.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), CoreError> {
        self.inner.permits.close();

        let mut in_flight = self.inner.in_flight.subscribe();
        let outstanding = *in_flight.borrow();
        if outstanding > 0 {
            debug!(outstanding, "waiting for borrowed connections");
        }
        match tokio::time::timeout(deadline, in_flight.wait_for(|n| *n == 0)).await {
            Ok(Ok(_)) => {}
            Ok(Err(_)) => return Err(CoreError::PoolClosed),
            Err(_) => return Err(CoreError::ShutdownTimeout(deadline)),
        }

        for session in &self.inner.sessions {
            session.close().await;
        }
        info!(sessions = self.size(), "connection pool closed");
        Ok(())
    }
}

/// A borrowed session. Derefs to the node RPC interface.
pub struct PooledConnection {
    session: Arc<dyn NodeRpc>,
    pool: Arc<PoolInner>,
    // Released after the session is back in the idle list.
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    /// `true` if both guards wrap the same underlying session.
    pub fn same_session(&self, other: &PooledConnection) -> bool {
        Arc::ptr_eq(&self.session, &other.session)
    }
}

impl Deref for PooledConnection {
    type Target = dyn NodeRpc;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.pool.give_back(Arc::clone(&self.session));
    }
}
