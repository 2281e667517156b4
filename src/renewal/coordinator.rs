use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::oauth2::{BearerTransport, ClientCredentials};
use crate::observability::metrics::get_metrics;
use crate::renewal::single_flight::SingleFlight;
use crate::transport::{RequestContext, Transport};

const RENEW_KEY: &str = "renew";

type Cell = Arc<RwLock<Arc<BearerTransport>>>;

/// Owns the authenticator's inner transport and serializes its replacement.
///
/// Readers copy the current `Arc` and never hold the lock across I/O; the
/// only writer is a successful renewal round.
pub struct RenewalCoordinator {
    credentials: Arc<ClientCredentials>,
    base: Arc<dyn Transport>,
    current: Cell,
    flights: SingleFlight<Result<(), Arc<Error>>>,
}

impl RenewalCoordinator {
    pub fn new(credentials: Arc<ClientCredentials>, base: Arc<dyn Transport>) -> Self {
        let first = Arc::new(BearerTransport::new(1, credentials.clone(), base.clone()));
        Self {
            credentials,
            base,
            current: Arc::new(RwLock::new(first)),
            flights: SingleFlight::new(),
        }
    }

    pub fn credentials(&self) -> &Arc<ClientCredentials> {
        &self.credentials
    }

    /// Inner transport to use for the next attempt.
    pub fn current(&self) -> Arc<BearerTransport> {
        read(&self.current)
    }

    /// Replaces the inner transport that served generation `observed`.
    ///
    /// Returns immediately if that generation was already replaced. Otherwise
    /// joins the in-flight round or starts one; every caller of a round gets
    /// its outcome. Waiting honors `ctx`, the round itself runs to completion
    /// for the remaining waiters.
    pub async fn renew(&self, observed: u64, ctx: &RequestContext) -> Result<()> {
        let metrics = get_metrics().await;
        if self.current().generation() != observed {
            debug!(observed, "inner transport already renewed");
            metrics.renewals.with_label_values(&["skipped"]).inc();
            return Ok(());
        }

        let credentials = self.credentials.clone();
        let base = self.base.clone();
        let current = self.current.clone();
        let (outcome, joined) = ctx
            .run(async {
                Ok::<_, Error>(
                    self.flights
                        .run(RENEW_KEY, move || renew_round(credentials, base, current, observed))
                        .await,
                )
            })
            .await?;

        if joined {
            debug!(observed, "joined in-flight renewal");
            metrics.renewal_joins.inc();
        }
        let Some(outcome) = outcome else {
            warn!(observed, "renewal round ended without an outcome");
            metrics.renewals.with_label_values(&["aborted"]).inc();
            return Err(Error::Renewal(Arc::new(Error::RenewalAborted)));
        };
        outcome.map_err(Error::Renewal)
    }
}

async fn renew_round(
    credentials: Arc<ClientCredentials>,
    base: Arc<dyn Transport>,
    current: Cell,
    observed: u64,
) -> Result<(), Arc<Error>> {
    let metrics = get_metrics().await;
    // a round for this generation may have finished between the caller's check and now
    if read(&current).generation() != observed {
        metrics.renewals.with_label_values(&["skipped"]).inc();
        return Ok(());
    }

    info!(generation = observed + 1, "renewing access token");
    let round = RequestContext::new().with_timeout(credentials.renewal_timeout());
    let next = Arc::new(BearerTransport::new(observed + 1, credentials, base));
    if let Err(err) = next.token(&round).await {
        warn!(generation = observed, "token renewal failed: {err}");
        metrics.renewals.with_label_values(&["failure"]).inc();
        return Err(Arc::new(err));
    }

    *current.write().unwrap_or_else(PoisonError::into_inner) = next;
    metrics.renewals.with_label_values(&["success"]).inc();
    info!(generation = observed + 1, "access token renewed");
    Ok(())
}

fn read(cell: &Cell) -> Arc<BearerTransport> {
    cell.read().unwrap_or_else(PoisonError::into_inner).clone()
}
