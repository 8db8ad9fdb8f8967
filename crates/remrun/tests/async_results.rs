//! Deferred results completed by a later push from the peer.

mod common;

use remrun::CallError;
use remrun::SessionError;
use remrun::Value;

use common::DIVIDE_BY_ZERO;
use common::calculator;
use common::method;
use common::pair;

#[tokio::test]
async fn test_deferred_value_arrives() {
    let p = pair();
    let calc = p.client_side.lookup_name("calc").await.expect("lookup");

    let reply = calc
        .invoke(&method(&calculator(), "square_later"), vec![Value::I32(7).into()])
        .await
        .expect("invoke");
    let pending = reply.into_async().expect("async reply");
    assert_eq!(pending.wait().await.expect("wait"), Value::I32(49));
    assert_eq!(p.client_side.pending_async(), 0);
}

#[tokio::test]
async fn test_many_deferred_values() {
    let p = pair();
    let calc = p.client_side.lookup_name("calc").await.expect("lookup");
    let square = method(&calculator(), "square_later");

    let mut handles = Vec::new();
    for n in 0..8 {
        let reply = calc.invoke(&square, vec![Value::I32(n).into()]).await.expect("invoke");
        handles.push((n, reply.into_async().expect("async reply")));
    }

    let mut ids: Vec<u64> = handles.iter().map(|(_, h)| h.id()).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 8);

    for (n, handle) in handles {
        assert_eq!(handle.wait().await.expect("wait"), Value::I32(n * n));
    }
    assert_eq!(p.client_side.pending_async(), 0);
}

#[tokio::test]
async fn test_deferred_failure_is_declared_exception() {
    let p = pair();
    let calc = p.client_side.lookup_name("calc").await.expect("lookup");

    let reply = calc
        .invoke(&method(&calculator(), "fail_later"), vec![Value::from("too late").into()])
        .await
        .expect("invoke");
    let err = reply.into_async().expect("async reply").wait().await.unwrap_err();
    match err {
        CallError::Remote(thrown) => {
            assert_eq!(thrown.class, DIVIDE_BY_ZERO);
            assert_eq!(thrown.message.as_deref(), Some("too late"));
        }
        _ => panic!("Expected Remote, got {:?}", err),
    }
}

#[tokio::test]
async fn test_unfinished_result_fails_on_close() {
    let p = pair();
    let calc = p.client_side.lookup_name("calc").await.expect("lookup");

    let reply = calc.invoke(&method(&calculator(), "never"), vec![]).await.expect("invoke");
    let pending = reply.into_async().expect("async reply");
    assert_eq!(p.client_side.pending_async(), 1);

    let waiter = tokio::spawn(pending.wait());
    p.client_side.close().await;

    let err = waiter.await.expect("join").unwrap_err();
    match err {
        CallError::Session(SessionError::Closed) => {}
        _ => panic!("Expected Session(Closed), got {:?}", err),
    }
    assert_eq!(p.client_side.pending_async(), 0);
}
