//! Anchor Worker: periodically drains pending queues and submits
//! `recordSpend` through the facilitator signer.
//!
//! A long-lived background task: `tokio::select!` between a sleep and a
//! shutdown channel, `SignerMiddleware`-wrapped contract writes.

use std::sync::Arc;
use std::time::Duration;

use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, U256};
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use crate::config::AnchorMode;
use crate::state::AegisApp;
use reservation_store::QueueRecord;

pub struct AnchorOutcome {
    pub scanned: usize,
    pub processed: usize,
    pub txs: Vec<String>,
}

type Facilitator = SignerMiddleware<Provider<Http>, LocalWallet>;

async fn build_facilitator(app: &AegisApp) -> anyhow::Result<Facilitator> {
    let provider = Provider::<Http>::try_from(app.config.upstream_url.clone())?;
    let chain_id = provider.get_chainid().await?.as_u64();
    let wallet: LocalWallet = app.config.facilitator_key.parse::<LocalWallet>()?.with_chain_id(chain_id);
    Ok(SignerMiddleware::new(provider, wallet))
}

/// Drain up to `batch_size` records for one `(user, agent)` pending key.
/// Stops early (per record loop `break`) on the first submission or mined
/// revert — prevents hot-looping on systemic reverts. The `processed` marker
/// is set only after a submission succeeds, never before: a record that
/// fails to submit is pushed to the failed queue with no marker set, so an
/// operator-initiated retry from that queue is resubmitted rather than
/// silently skipped.
#[instrument(skip(app, facilitator), fields(%user, %agent))]
async fn drain_key(
    app: &AegisApp,
    facilitator: &Facilitator,
    user: Address,
    agent: Address,
    batch_size: usize,
    mode: AnchorMode,
) -> (usize, usize, Vec<String>) {
    let mut scanned = 0;
    let mut processed = 0;
    let mut txs = Vec::new();

    let records = match app.reservation_store.pop_pending_batch(user, agent, batch_size).await {
        Ok(records) => records,
        Err(err) => {
            error!(?err, "failed to pop pending batch");
            return (0, 0, txs);
        }
    };

    for record in records {
        scanned += 1;

        let tx_hash = match record.request_tx_hash {
            Some(hash) => hash,
            None => {
                warn!("record missing tx hash, moving to failed queue");
                push_failed(app, user, agent, &record).await;
                continue;
            }
        };

        let already_processed = match app.reservation_store.is_processed(tx_hash).await {
            Ok(processed) => processed,
            Err(err) => {
                error!(?err, "failed to check processed marker");
                push_failed(app, user, agent, &record).await;
                continue;
            }
        };
        if already_processed {
            info!(%tx_hash, "already anchored, skipping replayed record");
            continue;
        }

        match submit_record_spend(facilitator, app.config.contract_address, user, agent, record.amount, tx_hash).await {
            Ok(()) => {
                if let Err(err) = app.reservation_store.mark_processed(tx_hash).await {
                    error!(?err, %tx_hash, "submitted recordSpend but failed to set processed marker");
                }
                processed += 1;
                txs.push(format!("{tx_hash:#x}"));
                if mode == AnchorMode::OneShot {
                    break;
                }
            }
            Err(err) => {
                error!(?err, %tx_hash, "anchor submission failed or reverted");
                push_failed(app, user, agent, &record).await;
                break;
            }
        }
    }

    (scanned, processed, txs)
}

async fn push_failed(app: &AegisApp, user: Address, agent: Address, record: &QueueRecord) {
    if let Err(err) = app.reservation_store.push_failed(user, agent, record).await {
        error!(?err, "failed to push record to failed queue");
    }
}

async fn submit_record_spend(
    facilitator: &Facilitator,
    contract_address: Address,
    user: Address,
    agent: Address,
    amount: U256,
    tx_hash: ethers::types::TxHash,
) -> anyhow::Result<()> {
    let contract = policy_contracts::PolicyRegistry::new(contract_address, Arc::new(facilitator.clone()));
    let call = contract.record_spend(user, agent, amount, tx_hash.into());
    let pending = call.send().await?;
    let receipt = pending.await?;
    match receipt {
        Some(receipt) if receipt.status == Some(1.into()) => Ok(()),
        Some(_) => anyhow::bail!("recordSpend transaction reverted"),
        None => anyhow::bail!("recordSpend transaction dropped from mempool"),
    }
}

/// Run exactly one anchor iteration: scan every `pending:*` key live in the
/// store and drain each. Callers are responsible for holding the anchor
/// lock around this call — both the periodic loop and the admin one-shot
/// trigger acquire it themselves before calling in.
pub async fn run_one_iteration(app: &Arc<AegisApp>) -> anyhow::Result<AnchorOutcome> {
    let start = tokio::time::Instant::now();

    let facilitator = build_facilitator(app).await?;
    let keys = app.reservation_store.scan_pending_keys().await?;

    let mut total_scanned = 0;
    let mut total_processed = 0;
    let mut all_txs = Vec::new();

    for (user, agent) in keys {
        let (scanned, processed, txs) = drain_key(
            app,
            &facilitator,
            user,
            agent,
            app.config.anchor_batch_size,
            app.config.anchor_mode,
        )
        .await;
        total_scanned += scanned;
        total_processed += processed;
        all_txs.extend(txs);

        // brief delay between keys to avoid bursting the upstream RPC
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    app.metrics_recorder.record("anchor_iteration", start.elapsed());

    Ok(AnchorOutcome {
        scanned: total_scanned,
        processed: total_processed,
        txs: all_txs,
    })
}

/// Long-lived background task: sleeps `anchor_epoch_seconds`, then runs one
/// iteration under the distributed lock, repeating until `shutdown` fires.
pub async fn run_periodic(app: Arc<AegisApp>, mut shutdown: watch::Receiver<bool>) {
    let period = Duration::from_secs(app.config.anchor_epoch_seconds);
    let token = uuid::Uuid::new_v4().to_string();

    loop {
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("anchor worker shutting down mid-sleep");
                    return;
                }
            }
        }

        let guard = match app.reservation_store.try_acquire_anchor_lock(&token).await {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                info!("anchor lock held elsewhere, skipping this epoch");
                continue;
            }
            Err(err) => {
                error!(?err, "failed to acquire anchor lock");
                continue;
            }
        };

        match run_one_iteration(&app).await {
            Ok(outcome) => info!(scanned = outcome.scanned, processed = outcome.processed, "anchor iteration complete"),
            Err(err) => error!(?err, "anchor iteration failed"),
        }

        if let Err(err) = app.reservation_store.release_anchor_lock(guard).await {
            error!(?err, "failed to release anchor lock");
        }

        if *shutdown.borrow() {
            info!("anchor worker shutting down after completing iteration");
            return;
        }
    }
}
