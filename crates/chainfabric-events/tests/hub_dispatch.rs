//! Dispatch of inbound events to block, chaincode and transaction registrants.

mod common;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::timeout;

use chainfabric_core::wire::{Event, TxValidationCode};
use chainfabric_events::{ChaincodeEventRecord, ChaincodeRegistration, EventHubError};

use common::{block, cc_event, endorser_tx, hub, tx_block, wait_until, MockTransport};

const WAIT: Duration = Duration::from_secs(2);

type TxOutcome = (String, TxValidationCode, Result<(), EventHubError>);

fn tx_sink(
    tx: mpsc::UnboundedSender<TxOutcome>,
) -> impl Fn(&str, TxValidationCode, Result<(), EventHubError>) + Send + Sync + 'static {
    move |tx_id: &str, code: TxValidationCode, result: Result<(), EventHubError>| {
        let _ = tx.send((tx_id.to_string(), code, result));
    }
}

#[tokio::test]
async fn chaincode_event_reaches_exact_registrant_once() {
    let mock = MockTransport::new();
    let hub = hub(&mock);
    let (tx, mut rx) = mpsc::unbounded_channel::<ChaincodeEventRecord>();
    hub.register_chaincode_event("cc1", "evt1", move |rec| {
        let _ = tx.send(rec.clone());
    })
    .unwrap();

    assert!(hub.recv(Event::chaincode(cc_event("cc1", "tx1", "evt1"))).unwrap());

    let rec = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(rec.chaincode_id, "cc1");
    assert_eq!(rec.event_name, "evt1");
    assert_eq!(rec.tx_id, "tx1");
    assert_eq!(rec.payload, b"evt1-payload");
    assert_eq!(rec.channel_id, "");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn direct_chaincode_events_do_not_use_patterns() {
    let mock = MockTransport::new();
    let hub = hub(&mock);
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let tx2 = tx.clone();
    hub.register_chaincode_event("cc1", "evt.*", move |rec| {
        let _ = tx.send(format!("pattern:{}", rec.event_name));
    })
    .unwrap();
    hub.register_chaincode_event("cc1", "evt2", move |rec| {
        let _ = tx2.send(format!("exact:{}", rec.event_name));
    })
    .unwrap();

    hub.recv(Event::chaincode(cc_event("cc1", "tx1", "evt2"))).unwrap();
    hub.recv(Event::chaincode(cc_event("other", "tx2", "evt2"))).unwrap();

    assert_eq!(timeout(WAIT, rx.recv()).await.unwrap().unwrap(), "exact:evt2");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn valid_transaction_reaches_tx_registrant() {
    let mock = MockTransport::new();
    let hub = hub(&mock);
    let (tx, mut rx) = mpsc::unbounded_channel();
    hub.register_tx_event("tx123", tx_sink(tx));

    hub.recv(Event::block(tx_block(7, "mychannel", &[("tx123", TxValidationCode::Valid)])))
        .unwrap();

    let (tx_id, code, result) = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(tx_id, "tx123");
    assert_eq!(code, TxValidationCode::Valid);
    assert!(result.is_ok());
    // registrant stays until explicitly removed
    assert_eq!(hub.tx_registrant_count(), 1);
    assert!(hub.unregister_tx_event("tx123"));
    assert_eq!(hub.tx_registrant_count(), 0);
}

#[tokio::test]
async fn invalid_transaction_carries_error() {
    let mock = MockTransport::new();
    let hub = hub(&mock);
    let (tx, mut rx) = mpsc::unbounded_channel();
    hub.register_tx_event("tx123", tx_sink(tx));

    hub.recv(Event::block(tx_block(
        7,
        "mychannel",
        &[("tx123", TxValidationCode::MvccReadConflict)],
    )))
    .unwrap();

    let (tx_id, code, result) = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(tx_id, "tx123");
    assert_eq!(code, TxValidationCode::MvccReadConflict);
    match result {
        Err(EventHubError::InvalidTransaction { channel_id, code, .. }) => {
            assert_eq!(channel_id, "mychannel");
            assert_eq!(code, TxValidationCode::MvccReadConflict);
        }
        other => panic!("expected InvalidTransaction, got {other:?}"),
    }
}

#[tokio::test]
async fn each_transaction_gets_its_own_flag() {
    let mock = MockTransport::new();
    let hub = hub(&mock);
    let (tx, mut rx) = mpsc::unbounded_channel();
    for id in ["a", "b", "c"] {
        hub.register_tx_event(id, tx_sink(tx.clone()));
    }

    hub.recv(Event::block(tx_block(
        3,
        "ch",
        &[
            ("a", TxValidationCode::Valid),
            ("b", TxValidationCode::EndorsementPolicyFailure),
            ("c", TxValidationCode::Valid),
        ],
    )))
    .unwrap();

    let mut got = Vec::new();
    for _ in 0..3 {
        let (id, code, result) = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        got.push((id, code, result.is_ok()));
    }
    // positional order within one block
    assert_eq!(
        got,
        vec![
            ("a".to_string(), TxValidationCode::Valid, true),
            ("b".to_string(), TxValidationCode::EndorsementPolicyFailure, false),
            ("c".to_string(), TxValidationCode::Valid, true),
        ]
    );
}

#[tokio::test]
async fn missing_flags_mean_not_validated() {
    let mock = MockTransport::new();
    let hub = hub(&mock);
    let (tx, mut rx) = mpsc::unbounded_channel();
    hub.register_tx_event("late", tx_sink(tx));

    let blk = block(
        1,
        vec![endorser_tx("ch", "first", None), endorser_tx("ch", "late", None)],
        &[TxValidationCode::Valid],
    );
    hub.recv(Event::block(blk)).unwrap();

    let (_, code, result) = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(code, TxValidationCode::NotValidated);
    assert!(result.is_err());
}

#[tokio::test]
async fn undecodable_transaction_is_skipped() {
    let mock = MockTransport::new();
    let hub = hub(&mock);
    let (tx, mut rx) = mpsc::unbounded_channel();
    hub.register_tx_event("good", tx_sink(tx));

    let blk = block(
        2,
        vec![vec![0xff, 0xff, 0xff], endorser_tx("ch", "good", None)],
        &[TxValidationCode::Valid, TxValidationCode::Valid],
    );
    hub.recv(Event::block(blk)).unwrap();

    let (id, _, result) = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(id, "good");
    assert!(result.is_ok());
}

#[tokio::test]
async fn block_chaincode_events_match_patterns_and_carry_channel() {
    let mock = MockTransport::new();
    let hub = hub(&mock);
    let (tx, mut rx) = mpsc::unbounded_channel::<ChaincodeEventRecord>();
    hub.register_chaincode_event("marbles", "transfer_[0-9]+", move |rec| {
        let _ = tx.send(rec.clone());
    })
    .unwrap();

    let blk = block(
        9,
        vec![
            endorser_tx("mychannel", "t1", Some(cc_event("marbles", "t1", "transfer_1"))),
            endorser_tx("mychannel", "t2", Some(cc_event("marbles", "t2", "transfer_2"))),
            endorser_tx("mychannel", "t3", Some(cc_event("marbles", "t3", "delete"))),
        ],
        &[
            TxValidationCode::Valid,
            TxValidationCode::MvccReadConflict,
            TxValidationCode::Valid,
        ],
    );
    hub.recv(Event::block(blk)).unwrap();

    let rec = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(rec.event_name, "transfer_1");
    assert_eq!(rec.tx_id, "t1");
    assert_eq!(rec.channel_id, "mychannel");

    // t2 was invalidated, t3 does not match
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn block_registrants_run_in_order_before_chaincode_registrants() {
    let mock = MockTransport::new();
    let hub = hub(&mock);
    let log = Arc::new(Mutex::new(Vec::<String>::new()));

    for name in ["first", "second"] {
        let log = log.clone();
        hub.register_block_event(move |b| log.lock().push(format!("{name}:{}", b.number())))
            .unwrap();
    }
    let cc_log = log.clone();
    hub.register_chaincode_event("cc", "evt", move |_| cc_log.lock().push("chaincode".into()))
        .unwrap();

    hub.recv(Event::block(block(
        42,
        vec![endorser_tx("ch", "t", Some(cc_event("cc", "t", "evt")))],
        &[TxValidationCode::Valid],
    )))
    .unwrap();

    assert!(wait_until(WAIT, || log.lock().len() == 3).await);
    assert_eq!(*log.lock(), vec!["first:42", "second:42", "chaincode"]);
}

#[tokio::test]
async fn unregistering_one_handle_leaves_its_twin() {
    let mock = MockTransport::new();
    let hub = hub(&mock);
    let (tx, mut rx) = mpsc::unbounded_channel::<&'static str>();
    let tx_b = tx.clone();
    let a = hub
        .register_chaincode_event("cc1", "evt1", move |_| {
            let _ = tx.send("a");
        })
        .unwrap();
    let _b = hub
        .register_chaincode_event("cc1", "evt1", move |_| {
            let _ = tx_b.send("b");
        })
        .unwrap();

    assert!(hub.unregister_chaincode_event(&a).unwrap());
    assert!(!hub.unregister_chaincode_event(&a).unwrap());
    assert_eq!(hub.chaincode_registrant_count(), 1);

    hub.recv(Event::chaincode(cc_event("cc1", "tx", "evt1"))).unwrap();
    assert_eq!(timeout(WAIT, rx.recv()).await.unwrap().unwrap(), "b");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn removing_tx_dispatcher_silences_tx_registrants() {
    let mock = MockTransport::new();
    let hub = hub(&mock);
    let (tx, mut rx) = mpsc::unbounded_channel();
    hub.register_tx_event("tx1", tx_sink(tx));
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<u64>();
    hub.register_block_event(move |b| {
        let _ = seen_tx.send(b.number());
    })
    .unwrap();

    assert!(hub.unregister_block_event(&hub.tx_dispatch_registration()).unwrap());
    hub.recv(Event::block(tx_block(5, "ch", &[("tx1", TxValidationCode::Valid)])))
        .unwrap();

    assert_eq!(timeout(WAIT, seen_rx.recv()).await.unwrap().unwrap(), 5);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn callbacks_may_unregister_themselves() {
    let mock = MockTransport::new();
    let hub = hub(&mock);
    let hits = Arc::new(Mutex::new(0usize));
    let slot: Arc<Mutex<Option<ChaincodeRegistration>>> = Arc::new(Mutex::new(None));

    let inner_hub = hub.clone();
    let inner_slot = slot.clone();
    let inner_hits = hits.clone();
    let handle = hub
        .register_chaincode_event("cc", "once", move |_| {
            *inner_hits.lock() += 1;
            if let Some(me) = inner_slot.lock().take() {
                inner_hub.unregister_chaincode_event(&me).unwrap();
            }
            inner_hub.register_tx_event("registered-from-callback", |_: &str, _, _| {});
        })
        .unwrap();
    *slot.lock() = Some(handle);

    hub.recv(Event::chaincode(cc_event("cc", "t1", "once"))).unwrap();
    assert!(wait_until(WAIT, || hub.chaincode_registrant_count() == 0).await);
    hub.recv(Event::chaincode(cc_event("cc", "t2", "once"))).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(*hits.lock(), 1);
    assert_eq!(hub.tx_registrant_count(), 1);
}

#[tokio::test]
async fn wait_for_tx_resolves_and_cleans_up() {
    let mock = MockTransport::new();
    let hub = hub(&mock);

    let feeder = hub.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        feeder
            .recv(Event::block(tx_block(
                1,
                "ch",
                &[("ok", TxValidationCode::Valid), ("bad", TxValidationCode::DuplicateTxid)],
            )))
            .unwrap();
    });

    let (ok, bad) = tokio::join!(
        hub.wait_for_tx("ok", WAIT),
        hub.wait_for_tx("bad", WAIT)
    );
    assert_eq!(ok.unwrap(), TxValidationCode::Valid);
    assert!(matches!(
        bad,
        Err(EventHubError::InvalidTransaction { code: TxValidationCode::DuplicateTxid, .. })
    ));
    assert_eq!(hub.tx_registrant_count(), 0);

    let err = hub.wait_for_tx("never", Duration::from_millis(30)).await.unwrap_err();
    assert!(matches!(err, EventHubError::TxWaitTimeout { timeout_ms: 30, .. }));
    assert_eq!(hub.tx_registrant_count(), 0);
}

#[tokio::test]
async fn wait_for_tx_leaves_a_newer_registration_alone() {
    let mock = MockTransport::new();
    let hub = hub(&mock);
    let (tx, mut rx) = mpsc::unbounded_channel();

    // Runs right after the transaction dispatcher, before the waiter resumes.
    let reregister = hub.clone();
    hub.register_block_event(move |_| {
        reregister.register_tx_event("tx1", tx_sink(tx.clone()));
    })
    .unwrap();

    let feeder = hub.clone();
    let (outcome, ()) = tokio::join!(hub.wait_for_tx("tx1", WAIT), async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        feeder
            .recv(Event::block(tx_block(1, "ch", &[("tx1", TxValidationCode::Valid)])))
            .unwrap();
    });
    assert_eq!(outcome.unwrap(), TxValidationCode::Valid);
    assert_eq!(hub.tx_registrant_count(), 1);

    hub.recv(Event::block(tx_block(2, "ch", &[("tx1", TxValidationCode::Valid)])))
        .unwrap();
    let (tx_id, code, result) = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(tx_id, "tx1");
    assert_eq!(code, TxValidationCode::Valid);
    assert!(result.is_ok());
}

#[tokio::test]
async fn wait_for_tx_reports_replacement() {
    let mock = MockTransport::new();
    let hub = hub(&mock);
    let (tx, _rx) = mpsc::unbounded_channel();

    let other = hub.clone();
    let (outcome, ()) = tokio::join!(hub.wait_for_tx("tx1", WAIT), async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        other.register_tx_event("tx1", tx_sink(tx));
    });
    assert!(matches!(
        outcome,
        Err(EventHubError::TxRegistrationReplaced { ref tx_id }) if tx_id == "tx1"
    ));
    assert_eq!(hub.tx_registrant_count(), 1);
}

#[tokio::test]
async fn unknown_validation_byte_reaches_the_callback() {
    let mock = MockTransport::new();
    let hub = hub(&mock);
    let (tx, mut rx) = mpsc::unbounded_channel();
    hub.register_tx_event("tx1", tx_sink(tx));

    let mut blk = tx_block(3, "ch", &[("tx1", TxValidationCode::Valid)]);
    blk.metadata.as_mut().unwrap().metadata[2] = vec![42];
    hub.recv(Event::block(blk)).unwrap();

    let (_, code, result) = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(code, TxValidationCode::InvalidOtherReason);
    match result {
        Err(EventHubError::InvalidTransaction { raw_code, .. }) => assert_eq!(raw_code, 42),
        other => panic!("expected InvalidTransaction, got {other:?}"),
    }
}
