#[cfg(test)]
mod tests {
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    use crate::bus::{EventBus, InMemoryBus, Subscriber, Subscription};
    use crate::error::ExchangeError;
    use crate::exchange::{ExchangeOptions, Exchanger};
    use crate::types::{correlation_id_of, CORRELATION_ID_FIELD};

    const SIGNAL: &str = "user.create";
    const SUCCESS: &str = "user.created";
    const FAILURE: &str = "user.create.failed";

    /// A remote service: answers `signal` with the replies built by `reply`,
    /// published from a separate task as a real peer would.
    async fn respond<R>(bus: &InMemoryBus, reply: R) -> Subscription
    where
        R: Fn(&Value) -> Vec<(&'static str, Value)> + Send + Sync + 'static,
    {
        let peer = bus.clone();
        bus.subscribe(
            SIGNAL,
            Subscriber::new("user-service", move |request| {
                let replies = reply(&request);
                let peer = peer.clone();
                tokio::spawn(async move {
                    for (event, payload) in replies {
                        peer.publish(event, payload).await.unwrap();
                    }
                });
                Ok(())
            }),
        )
        .await
        .unwrap()
    }

    fn with_id(request: &Value, mut reply: Value) -> Value {
        reply[CORRELATION_ID_FIELD] = json!(correlation_id_of(request).unwrap());
        reply
    }

    fn options() -> ExchangeOptions {
        ExchangeOptions::new(SIGNAL, json!({"name": "ada"}), SUCCESS).failure(FAILURE)
    }

    fn assert_torn_down(bus: &InMemoryBus) {
        assert_eq!(bus.subscriber_count(SUCCESS), 0);
        assert_eq!(bus.subscriber_count(FAILURE), 0);
    }

    #[tokio::test]
    async fn test_success_reply_resolves() {
        let bus = Arc::new(InMemoryBus::new());
        let _svc = respond(&bus, |req| {
            assert_eq!(req["name"], "ada");
            vec![(SUCCESS, with_id(req, json!({"id": 42})))]
        })
        .await;

        let reply = Exchanger::new(bus.clone())
            .exchange(options().timeout(Duration::from_millis(1000)))
            .await
            .unwrap();

        assert_eq!(reply["id"], 42);
        assert_torn_down(&bus);
    }

    #[tokio::test]
    async fn test_failure_reply_rejects_with_payload() {
        let bus = Arc::new(InMemoryBus::new());
        let _svc = respond(&bus, |req| {
            vec![(
                FAILURE,
                with_id(req, json!({"error": {"code": "Conflict", "status": 409}})),
            )]
        })
        .await;

        let err = Exchanger::new(bus.clone()).exchange(options()).await.unwrap_err();

        match err {
            ExchangeError::FailureReply(payload) => {
                assert_eq!(payload["error"]["code"], "Conflict");
                assert!(correlation_id_of(&payload).is_some());
            }
            other => panic!("expected failure reply, got {other:?}"),
        }
        assert_torn_down(&bus);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_names_all_events() {
        let bus = Arc::new(InMemoryBus::new());
        let exchanger = Exchanger::new(bus.clone());

        let started = Instant::now();
        let err = exchanger
            .exchange(options().timeout(Duration::from_secs(1)))
            .await
            .unwrap_err();

        assert!(started.elapsed() >= Duration::from_secs(1));
        let message = err.to_string();
        for event in [SIGNAL, SUCCESS, FAILURE] {
            assert!(message.contains(&format!("[{event}]")), "{message}");
        }
        match err {
            ExchangeError::Timeout { correlation_id, timeout, .. } => {
                assert_eq!(correlation_id.len(), 7);
                assert_eq!(timeout, Duration::from_secs(1));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_torn_down(&bus);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_timeout_applies() {
        let bus = Arc::new(InMemoryBus::new());
        let exchanger = Exchanger::with_default_timeout(bus.clone(), Duration::from_millis(250));

        let started = Instant::now();
        let err = exchanger
            .request(SIGNAL, json!({}), SUCCESS, None)
            .await
            .unwrap_err();

        assert!(matches!(err, ExchangeError::Timeout { failure: None, .. }));
        assert!(err.to_string().contains("[-]"));
        assert!(started.elapsed() >= Duration::from_millis(250));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_replies_for_other_exchanges_are_ignored() {
        let bus = Arc::new(InMemoryBus::new());
        let _svc = respond(&bus, |req| {
            vec![
                (SUCCESS, json!({"correlationId": "zzzzzzz", "who": "stranger"})),
                (FAILURE, json!({"who": "uncorrelated"})),
                (SUCCESS, with_id(req, json!({"who": req["name"].clone()}))),
            ]
        })
        .await;
        let exchanger = Exchanger::new(bus.clone());

        let (ada, bob) = tokio::join!(
            exchanger.request(SIGNAL, json!({"name": "ada"}), SUCCESS, Some(FAILURE)),
            exchanger.request(SIGNAL, json!({"name": "bob"}), SUCCESS, Some(FAILURE)),
        );

        assert_eq!(ada.unwrap()["who"], "ada");
        assert_eq!(bob.unwrap()["who"], "bob");
        assert_torn_down(&bus);
    }

    #[tokio::test]
    async fn test_first_reply_wins() {
        let bus = Arc::new(InMemoryBus::new());
        let _svc = respond(&bus, |req| {
            vec![
                (SUCCESS, with_id(req, json!({"attempt": 1}))),
                (FAILURE, with_id(req, json!({"attempt": 2}))),
                (SUCCESS, with_id(req, json!({"attempt": 3}))),
            ]
        })
        .await;

        let reply = Exchanger::new(bus.clone()).exchange(options()).await.unwrap();

        assert_eq!(reply["attempt"], 1);
        assert_torn_down(&bus);
    }

    #[tokio::test]
    async fn test_listeners_armed_before_signal() {
        let bus = Arc::new(InMemoryBus::new());
        let armed_at_signal = Arc::new(AtomicUsize::new(0));
        let _observer = {
            let peer = (*bus).clone();
            let armed_at_signal = armed_at_signal.clone();
            bus.subscribe(
                SIGNAL,
                Subscriber::new("observer", move |_| {
                    armed_at_signal.store(
                        peer.subscriber_count(SUCCESS) + peer.subscriber_count(FAILURE),
                        Ordering::SeqCst,
                    );
                    Ok(())
                }),
            )
            .await
            .unwrap()
        };
        let _svc = respond(&bus, |req| vec![(SUCCESS, with_id(req, json!({})))]).await;

        Exchanger::new(bus.clone()).exchange(options()).await.unwrap();

        assert_eq!(armed_at_signal.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dropped_exchange_tears_down() {
        let bus = Arc::new(InMemoryBus::new());
        let exchanger = Exchanger::new(bus.clone());

        let outcome = tokio::time::timeout(Duration::from_millis(20), exchanger.exchange(options())).await;

        assert!(outcome.is_err());
        assert_torn_down(&bus);
    }

    #[tokio::test]
    async fn test_non_object_payload_is_rejected() {
        let bus = Arc::new(InMemoryBus::new());
        let exchanger = Exchanger::new(bus.clone());

        let err = exchanger
            .exchange(ExchangeOptions::new(SIGNAL, json!([1, 2]), SUCCESS))
            .await
            .unwrap_err();

        assert!(matches!(err, ExchangeError::InvalidPayload(ref s) if s == SIGNAL));
        assert_eq!(bus.events_published(), 0);
        assert_torn_down(&bus);
    }
}
