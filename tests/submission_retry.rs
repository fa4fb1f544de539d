mod common;

use std::sync::Arc;
use std::time::Duration;

use basestack_agent::chain::{ChainClient, TxSigner};
use basestack_agent::domain::AttemptOutcome;
use basestack_agent::engine::{EngineParams, SubmissionEngine, SubmitError};
use basestack_agent::events::EventSink;
use basestack_agent::retry::CancelToken;

use common::{simple_swap_intent, MemorySink, MockChain, RecordingSigner, SubmitScript};

struct Fixture {
    chain: Arc<MockChain>,
    signer: Arc<RecordingSigner>,
    sink: Arc<MemorySink>,
    engine: SubmissionEngine,
}

fn fixture(script: Vec<SubmitScript>, params: EngineParams) -> Fixture {
    fixture_with_cancel(script, params, CancelToken::new())
}

fn fixture_with_cancel(
    script: Vec<SubmitScript>,
    params: EngineParams,
    cancel: CancelToken,
) -> Fixture {
    let chain = Arc::new(MockChain::new(7, 100, script));
    let signer = Arc::new(RecordingSigner::default());
    let sink = Arc::new(MemorySink::default());
    let chain_dyn: Arc<dyn ChainClient> = chain.clone();
    let signer_dyn: Arc<dyn TxSigner> = signer.clone();
    let sink_dyn: Arc<dyn EventSink> = sink.clone();
    let engine = SubmissionEngine::new(chain_dyn, signer_dyn, sink_dyn, cancel, params);
    Fixture {
        chain,
        signer,
        sink,
        engine,
    }
}

fn params() -> EngineParams {
    EngineParams {
        max_retries: 3,
        gas_bump_percent: 10,
        receipt_timeout: Duration::from_secs(1),
        receipt_extended_timeout: Duration::from_secs(1),
        dry_run: false,
    }
}

#[tokio::test(start_paused = true)]
async fn nonce_race_refetches_nonce_and_bumps_gas() {
    let fx = fixture(
        vec![
            SubmitScript::Reject("nonce too low".into()),
            SubmitScript::Reject("nonce too low".into()),
            SubmitScript::Accept { confirm: true },
        ],
        params(),
    );

    let submitted = fx.engine.submit(simple_swap_intent(50.0, 0.0007)).await.unwrap();

    assert_eq!(submitted.attempts.len(), 3);
    assert_eq!(submitted.attempts[0].outcome, AttemptOutcome::RetryableFailure);
    assert_eq!(submitted.attempts[1].outcome, AttemptOutcome::RetryableFailure);
    assert_eq!(submitted.attempts[2].outcome, AttemptOutcome::Confirmed);

    // Fresh nonce after every nonce-classified failure.
    assert_eq!(*fx.chain.nonce_calls.lock().unwrap(), 3);
    let requests = fx.signer.requests.lock().unwrap();
    let nonces: Vec<u64> = requests.iter().map(|r| r.nonce).collect();
    assert_eq!(nonces, vec![7, 8, 9]);

    // 10% bump per attempt, strictly increasing from the base of 100.
    let gas: Vec<u128> = requests.iter().map(|r| r.gas_price).collect();
    assert_eq!(gas, vec![100, 110, 120]);

    let terminal = fx.sink.of_kind("transaction");
    assert_eq!(terminal.len(), 1);
    assert_eq!(terminal[0].data["status"], "confirmed");
}

#[tokio::test(start_paused = true)]
async fn gas_race_keeps_nonce_across_retries() {
    let fx = fixture(
        vec![
            SubmitScript::Reject("replacement transaction underpriced".into()),
            SubmitScript::Accept { confirm: true },
        ],
        params(),
    );

    let submitted = fx.engine.submit(simple_swap_intent(50.0, 0.0007)).await.unwrap();

    assert_eq!(submitted.attempts.len(), 2);
    // No nonce-classified failure, so the nonce is fetched exactly once.
    assert_eq!(*fx.chain.nonce_calls.lock().unwrap(), 1);
    let requests = fx.signer.requests.lock().unwrap();
    assert_eq!(requests[0].nonce, 7);
    assert_eq!(requests[1].nonce, 7);
    assert!(requests[1].gas_price > requests[0].gas_price);
}

#[tokio::test(start_paused = true)]
async fn fatal_failure_short_circuits_without_retrying() {
    let fx = fixture(
        vec![SubmitScript::Reject(
            "execution reverted: INSUFFICIENT_LIQUIDITY".into(),
        )],
        params(),
    );

    let err = fx.engine.submit(simple_swap_intent(50.0, 0.0007)).await.unwrap_err();

    assert!(matches!(err, SubmitError::Fatal(_)));
    assert!(!err.is_ambiguous());
    assert_eq!(*fx.chain.submit_count.lock().unwrap(), 1);
    assert_eq!(fx.signer.requests.lock().unwrap().len(), 1);

    let terminal = fx.sink.of_kind("transaction");
    assert_eq!(terminal.len(), 1);
    assert_eq!(terminal[0].data["status"], "failed");
    let attempts = terminal[0].data["attempts"].as_array().unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0]["outcome"], "fatal_failure");
}

#[tokio::test(start_paused = true)]
async fn reverted_receipt_is_fatal() {
    let fx = fixture(vec![SubmitScript::Accept { confirm: false }], params());

    let err = fx.engine.submit(simple_swap_intent(50.0, 0.0007)).await.unwrap_err();

    match err {
        SubmitError::Fatal(msg) => assert!(msg.contains("execution reverted")),
        other => panic!("expected fatal revert, got {other:?}"),
    }
    assert_eq!(*fx.chain.submit_count.lock().unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_report_last_error() {
    let mut p = params();
    p.max_retries = 2;
    let fx = fixture(
        vec![
            SubmitScript::Reject("replacement transaction underpriced".into()),
            SubmitScript::Reject("replacement transaction underpriced".into()),
            SubmitScript::Reject("replacement transaction underpriced".into()),
        ],
        p,
    );

    let err = fx.engine.submit(simple_swap_intent(50.0, 0.0007)).await.unwrap_err();

    match err {
        SubmitError::RetriesExhausted { attempts, last_error } => {
            assert_eq!(attempts, 3);
            assert!(last_error.contains("underpriced"));
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }

    let requests = fx.signer.requests.lock().unwrap();
    let gas: Vec<u128> = requests.iter().map(|r| r.gas_price).collect();
    assert_eq!(gas, vec![100, 110, 120]);

    let terminal = fx.sink.of_kind("transaction");
    assert_eq!(terminal[0].data["status"], "failed");
}

#[tokio::test(start_paused = true)]
async fn unconfirmed_broadcast_is_replaced_then_surfaced_as_ambiguous() {
    let mut p = params();
    p.max_retries = 1;
    let fx = fixture(vec![SubmitScript::NeverMined, SubmitScript::NeverMined], p);

    let err = fx.engine.submit(simple_swap_intent(50.0, 0.0007)).await.unwrap_err();

    match &err {
        SubmitError::Unconfirmed { attempts, last_hash } => {
            assert_eq!(*attempts, 2);
            assert!(!last_hash.is_empty());
        }
        other => panic!("expected unconfirmed, got {other:?}"),
    }
    assert!(err.is_ambiguous());

    // The replacement reuses the original nonce with escalated gas.
    assert_eq!(*fx.chain.nonce_calls.lock().unwrap(), 1);
    let requests = fx.signer.requests.lock().unwrap();
    assert_eq!(requests[0].nonce, requests[1].nonce);
    assert!(requests[1].gas_price > requests[0].gas_price);

    let terminal = fx.sink.of_kind("transaction");
    assert_eq!(terminal.len(), 1);
    assert_eq!(terminal[0].data["status"], "unconfirmed");
    let attempts = terminal[0].data["attempts"].as_array().unwrap();
    assert!(attempts.iter().all(|a| a["outcome"] == "pending"));
}

#[tokio::test(start_paused = true)]
async fn read_failure_after_live_broadcast_is_ambiguous() {
    // One transaction goes out and sits unmined; then the gas price read
    // dies before the replacement. The broadcast may still confirm, so the
    // engine must report the ambiguous outcome, not a clean chain outage.
    let fx = fixture(vec![SubmitScript::NeverMined], params());
    *fx.chain.fail_gas_after.lock().unwrap() = Some(1);

    let err = fx.engine.submit(simple_swap_intent(50.0, 0.0007)).await.unwrap_err();

    match &err {
        SubmitError::Unconfirmed { attempts, last_hash } => {
            assert_eq!(*attempts, 1);
            assert!(!last_hash.is_empty());
        }
        other => panic!("expected unconfirmed, got {other:?}"),
    }
    assert!(err.is_ambiguous());
    assert_eq!(*fx.chain.submit_count.lock().unwrap(), 1);

    // The attempt history survives into the journal.
    let terminal = fx.sink.of_kind("transaction");
    assert_eq!(terminal.len(), 1);
    assert_eq!(terminal[0].data["status"], "unconfirmed");
    let attempts = terminal[0].data["attempts"].as_array().unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0]["outcome"], "pending");
}

#[tokio::test(start_paused = true)]
async fn read_failure_before_any_broadcast_is_chain_unavailable() {
    let fx = fixture(Vec::new(), params());
    *fx.chain.fail_gas_after.lock().unwrap() = Some(0);

    let err = fx.engine.submit(simple_swap_intent(50.0, 0.0007)).await.unwrap_err();

    assert!(matches!(err, SubmitError::ChainUnavailable(_)));
    assert!(!err.is_ambiguous());
    assert_eq!(*fx.chain.submit_count.lock().unwrap(), 0);
    assert!(fx.signer.requests.lock().unwrap().is_empty());
    // Nothing was broadcast, so there is no terminal transaction record.
    assert!(fx.sink.of_kind("transaction").is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancellation_preempts_backoff() {
    let cancel = CancelToken::new();
    cancel.cancel();
    let fx = fixture_with_cancel(
        vec![SubmitScript::Reject("request timeout".into())],
        params(),
        cancel,
    );

    let err = fx.engine.submit(simple_swap_intent(50.0, 0.0007)).await.unwrap_err();

    assert!(matches!(err, SubmitError::Cancelled));
    assert!(err.is_ambiguous());
    assert_eq!(*fx.chain.submit_count.lock().unwrap(), 1);
    assert_eq!(fx.sink.of_kind("transaction")[0].data["status"], "cancelled");
}

#[tokio::test(start_paused = true)]
async fn dry_run_never_touches_signer_or_chain() {
    let mut p = params();
    p.dry_run = true;
    let fx = fixture(Vec::new(), p);

    let submitted = fx.engine.submit(simple_swap_intent(50.0, 0.0007)).await.unwrap();

    assert_eq!(submitted.receipt.transaction_hash, "DRY_RUN");
    assert!(submitted.receipt.status);
    assert!(submitted.attempts.is_empty());
    assert_eq!(*fx.chain.submit_count.lock().unwrap(), 0);
    assert_eq!(*fx.chain.nonce_calls.lock().unwrap(), 0);
    assert!(fx.signer.requests.lock().unwrap().is_empty());
    assert_eq!(fx.sink.of_kind("transaction")[0].data["status"], "dry_run");
}
