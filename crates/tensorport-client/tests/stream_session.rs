mod common;

use anyhow::Result;
use common::{collector, delivered_ids, request, MockTransport};
use tensorport_client::{Error, Headers, InferRequestBuilder, StreamSession, StreamState};
use tonic::Code;

#[tokio::test(flavor = "multi_thread")]
async fn responses_follow_enqueue_order() -> Result<()> {
    let transport = MockTransport::default();
    let (outcomes, callback) = collector();
    let mut session = StreamSession::new(callback);

    for id in ["a", "b", "c"] {
        session.enqueue(request(id))?;
    }
    session.initialize(&transport).await?;
    session.enqueue(request("d"))?;
    session.enqueue(request("e"))?;
    session.close().await;

    assert_eq!(delivered_ids(&outcomes), ["a", "b", "c", "d", "e"]);
    assert_eq!(session.pending()?, 0);
    assert_eq!(session.state(), StreamState::Closed);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn close_is_idempotent() -> Result<()> {
    let transport = MockTransport::default();
    let (outcomes, callback) = collector();
    let mut session = StreamSession::new(callback);

    session.close().await;
    assert_eq!(session.state(), StreamState::Uninitialized);

    session.initialize(&transport).await?;
    session.enqueue(request("only"))?;
    session.close().await;
    session.close().await;

    assert_eq!(outcomes.lock().unwrap().len(), 1);
    assert_eq!(session.state(), StreamState::Closed);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn second_initialize_is_rejected() -> Result<()> {
    let transport = MockTransport::default();
    let mut session = StreamSession::new(|_| {});

    session.initialize(&transport).await?;
    assert!(matches!(
        session.initialize(&transport).await,
        Err(Error::AlreadyInitialized)
    ));

    session.close().await;
    assert!(matches!(
        session.initialize(&transport).await,
        Err(Error::AlreadyInitialized)
    ));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn channel_failure_ends_stream_with_one_error() -> Result<()> {
    let transport = MockTransport {
        fail_after: Some(2),
        ..Default::default()
    };
    let (outcomes, callback) = collector();
    let mut session = StreamSession::new(callback);

    session.initialize(&transport).await?;
    for id in ["r1", "r2", "r3"] {
        session.enqueue(request(id))?;
    }
    session.close().await;

    let outcomes = outcomes.lock().unwrap();
    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[0].as_ref().ok().and_then(|r| r.id()), Some("r1"));
    assert_eq!(outcomes[1].as_ref().ok().and_then(|r| r.id()), Some("r2"));
    match &outcomes[2] {
        Err(Error::StreamAborted {
            undelivered,
            source,
        }) => {
            assert_eq!(*undelivered, 1);
            assert_eq!(source.code, Code::Unavailable);
        }
        other => panic!("expected StreamAborted, got {other:?}"),
    }
    drop(outcomes);

    assert!(matches!(session.enqueue(request("r4")), Err(Error::StreamClosed)));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn early_end_of_stream_reports_unanswered_requests() -> Result<()> {
    let transport = MockTransport {
        end_after: Some(1),
        ..Default::default()
    };
    let (outcomes, callback) = collector();
    let mut session = StreamSession::new(callback);

    for id in ["a", "b", "c"] {
        session.enqueue(request(id))?;
    }
    session.initialize(&transport).await?;
    session.close().await;

    let outcomes = outcomes.lock().unwrap();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].as_ref().ok().and_then(|r| r.id()), Some("a"));
    match &outcomes[1] {
        Err(Error::StreamAborted { undelivered, .. }) => assert_eq!(*undelivered, 2),
        other => panic!("expected StreamAborted, got {other:?}"),
    }
    drop(outcomes);

    assert_eq!(session.state(), StreamState::Closed);
    assert!(matches!(session.enqueue(request("d")), Err(Error::StreamClosed)));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn application_errors_keep_stream_open() -> Result<()> {
    let transport = MockTransport {
        app_errors: vec!["bad".into()],
        ..Default::default()
    };
    let (outcomes, callback) = collector();
    let mut session = StreamSession::new(callback);

    session.initialize(&transport).await?;
    for id in ["a", "bad", "c"] {
        session.enqueue(request(id))?;
    }
    session.close().await;

    let outcomes = outcomes.lock().unwrap();
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes[0].is_ok());
    assert!(matches!(&outcomes[1], Err(Error::Application(m)) if m == "request bad rejected"));
    assert_eq!(outcomes[2].as_ref().ok().and_then(|r| r.id()), Some("c"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn headers_are_fixed_once_stream_opens() -> Result<()> {
    let transport = MockTransport::default();
    let mut session = StreamSession::new(|_| {});

    session.set_headers(&Headers::new().with("X-Tenant", "blue"))?;
    session.initialize(&transport).await?;
    assert_eq!(transport.header(0, "x-tenant").as_deref(), Some("blue"));

    let late = session.set_headers(&Headers::new().with("x-tenant", "red"));
    assert!(matches!(late, Err(Error::AlreadyInitialized)));
    session.close().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn refused_stream_closes_session() -> Result<()> {
    let transport = MockTransport {
        refuse_stream: Some((Code::PermissionDenied, "no streaming for you".into())),
        ..Default::default()
    };
    let (outcomes, callback) = collector();
    let mut session = StreamSession::new(callback);
    session.enqueue(request("early"))?;

    let err = session.initialize(&transport).await.unwrap_err();
    assert_eq!(err.code(), Some(Code::PermissionDenied));
    assert_eq!(session.state(), StreamState::Closed);
    assert!(matches!(session.enqueue(request("late")), Err(Error::StreamClosed)));

    session.close().await;
    assert!(outcomes.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn drop_waits_for_outstanding_responses() -> Result<()> {
    let transport = MockTransport::default();
    let (outcomes, callback) = collector();
    {
        let mut session = StreamSession::new(callback);
        session.initialize(&transport).await?;
        for i in 0..10 {
            session.enqueue(request(&format!("q{i}")))?;
        }
    }
    assert_eq!(outcomes.lock().unwrap().len(), 10);
    Ok(())
}

#[tokio::test]
async fn drop_on_current_thread_runtime_drains_in_background() -> Result<()> {
    let transport = MockTransport::default();
    let (outcomes, callback) = collector();
    {
        let mut session = StreamSession::new(callback);
        session.initialize(&transport).await?;
        session.enqueue(request("x"))?;
        session.enqueue(request("y"))?;
    }

    for _ in 0..200 {
        if outcomes.lock().unwrap().len() == 2 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert_eq!(delivered_ids(&outcomes), ["x", "y"]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn senders_keep_their_own_order_across_threads() -> Result<()> {
    let transport = MockTransport::default();
    let (outcomes, callback) = collector();
    let mut session = StreamSession::new(callback);
    session.initialize(&transport).await?;

    std::thread::scope(|scope| {
        for t in 0..3 {
            let sender = session.sender();
            scope.spawn(move || {
                for i in 0..20 {
                    sender.enqueue(request(&format!("t{t}-{i:02}"))).unwrap();
                }
            });
        }
    });
    session.close().await;

    let ids = delivered_ids(&outcomes);
    assert_eq!(ids.len(), 60);
    for t in 0..3 {
        let prefix = format!("t{t}-");
        let mine: Vec<_> = ids.iter().filter(|id| id.starts_with(&prefix)).collect();
        let mut sorted = mine.clone();
        sorted.sort();
        assert_eq!(mine, sorted);
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn sequence_parameters_travel_with_streamed_requests() -> Result<()> {
    let transport = MockTransport::default();
    let (outcomes, callback) = collector();
    let mut session = StreamSession::new(callback);
    session.initialize(&transport).await?;

    let steps = [(true, false), (false, false), (false, true)];
    for (i, (start, end)) in steps.into_iter().enumerate() {
        session.enqueue(
            InferRequestBuilder::new("acc")
                .request_id(i.to_string())
                .sequence(7, start, end)
                .build()?,
        )?;
    }
    session.close().await;

    let outcomes = outcomes.lock().unwrap();
    let flags: Vec<_> = outcomes
        .iter()
        .map(|o| {
            let r = o.as_ref().expect("echoed");
            (
                r.parameter("sequence_id").and_then(|p| p.as_int()),
                r.parameter("sequence_start").is_some(),
                r.parameter("sequence_end").is_some(),
            )
        })
        .collect();
    assert_eq!(
        flags,
        [
            (Some(7), true, false),
            (Some(7), false, false),
            (Some(7), false, true),
        ]
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn pending_counts_unanswered_requests() -> Result<()> {
    let transport = MockTransport::default();
    let mut session = StreamSession::new(|_| {});

    assert!(matches!(session.pending(), Err(Error::NotInitialized)));
    session.enqueue(request("x"))?;
    session.initialize(&transport).await?;
    session.close().await;
    assert_eq!(session.pending()?, 0);
    Ok(())
}
