mod common;

use std::time::Duration;

use common::*;
use futures_util::future::join_all;
use pw_relay_runtime::{AttachOutcome, ConnectError, ConnectHistory, Error, PageStatus, RelayEvent};
use serde_json::json;
use tokio::time::Instant;

const ATTACHED: &str = "Target.attachedToTarget";
const DETACHED: &str = "Target.detachedFromTarget";

#[tokio::test]
async fn concurrent_connects_share_one_handshake() {
	let mut h = harness(false);
	h.connector.set_handshake_delay(Some(Duration::from_millis(50)));

	let results = join_all((0..8).map(|_| h.relay.ensure_connected())).await;

	assert!(results.iter().all(Result::is_ok), "{results:?}");
	assert_eq!(h.connector.preflights(), 1);
	assert_eq!(h.connector.handshakes(), 1);
	let _peer = h.next_peer().await;
	assert!(h.peers.try_recv().is_err());
	assert_eq!(h.relay.snapshot().history, ConnectHistory::ConnectedBefore);
}

#[tokio::test]
async fn concurrent_connects_share_one_failure() {
	let mut h = harness(false);
	h.connector.set_handshake_delay(Some(Duration::from_millis(20)));
	h.connector.set_handshake_error(Some("403 forbidden"));

	let results = join_all((0..5).map(|_| h.relay.ensure_connected())).await;

	for result in &results {
		assert_eq!(result, &Err(ConnectError::HandshakeFailed("403 forbidden".to_string())));
	}
	assert_eq!(h.connector.handshakes(), 1);
	assert_eq!(h.relay.snapshot().history, ConnectHistory::NeverConnected);

	// The failed attempt is gone; the next call starts a fresh one.
	h.connector.set_handshake_error(None);
	h.relay.ensure_connected().await.unwrap();
	assert_eq!(h.connector.handshakes(), 2);
	let _peer = h.next_peer().await;
}

#[tokio::test]
async fn unreachable_host_skips_the_handshake() {
	let h = harness(false);
	h.connector.set_unreachable(Some("connection refused"));

	let err = h.relay.ensure_connected().await.unwrap_err();

	assert_eq!(err, ConnectError::Unreachable("connection refused".to_string()));
	assert_eq!(h.connector.preflights(), 1);
	assert_eq!(h.connector.handshakes(), 0);
	assert!(!h.relay.is_connected());
}

#[tokio::test]
async fn pending_requests_fail_on_disconnect() {
	let mut h = harness(false);
	let mut peer = h.connect().await;

	let calls: Vec<_> = (0..3)
		.map(|n| {
			let relay = h.relay.clone();
			tokio::spawn(async move { relay.request("Browser.getVersion", json!({ "n": n })).await })
		})
		.collect();
	let mut ids = Vec::new();
	for _ in 0..3 {
		let frame = recv(&mut peer).await;
		assert_eq!(frame["method"], "Browser.getVersion");
		ids.push(frame["id"].as_u64().unwrap());
	}
	assert_eq!(h.relay.snapshot().pending_requests, 3);

	peer.close();

	for call in calls {
		let result = tokio::time::timeout(WAIT, call).await.unwrap().unwrap();
		assert!(matches!(result, Err(Error::Disconnected)), "{result:?}");
	}
	assert_eq!(h.relay.snapshot().pending_requests, 0);

	// Late answers to the old ids on a new link resolve nothing.
	let mut peer = h.connect().await;
	for id in &ids {
		peer.send(&json!({ "id": id, "result": { "stale": true } }));
	}
	let relay = h.relay.clone();
	let call = tokio::spawn(async move { relay.request("Browser.getVersion", json!({})).await });
	let (frame, _) = recv_until(&mut peer, |f| is_method(f, "Browser.getVersion")).await;
	let id = frame["id"].as_u64().unwrap();
	assert!(!ids.contains(&id), "request id {id} was reused");

	peer.send(&json!({ "id": id, "result": { "product": "fake" } }));
	let value = tokio::time::timeout(WAIT, call).await.unwrap().unwrap().unwrap();
	assert_eq!(value, json!({ "product": "fake" }));
}

#[tokio::test]
async fn request_without_connection_is_rejected() {
	let h = harness(false);
	let result = h.relay.request("Browser.getVersion", json!({})).await;
	assert!(matches!(result, Err(Error::NotConnected)));
}

#[tokio::test]
async fn error_response_surfaces_as_remote_error() {
	let mut h = harness(false);
	let mut peer = h.connect().await;

	let relay = h.relay.clone();
	let call = tokio::spawn(async move { relay.request("Browser.crash", json!({})).await });
	let frame = recv(&mut peer).await;
	peer.send(&json!({ "id": frame["id"], "error": { "message": "not allowed" } }));

	let result = tokio::time::timeout(WAIT, call).await.unwrap().unwrap();
	assert!(matches!(result, Err(Error::Remote(ref m)) if m == "not allowed"), "{result:?}");
}

#[tokio::test]
async fn attach_is_idempotent() {
	let mut h = harness(false);
	let page = h.backend.add_page("https://example.com/");
	let mut peer = h.connect().await;

	let (first, second) = tokio::join!(h.relay.attach(page), h.relay.attach(page));
	let outcomes = [first.unwrap(), second.unwrap()];
	let attached: Vec<_> = outcomes
		.iter()
		.filter_map(|o| match o {
			AttachOutcome::Attached { session_id, target_id } => Some((session_id.clone(), target_id.clone())),
			AttachOutcome::AlreadyTracked => None,
		})
		.collect();
	assert_eq!(attached.len(), 1);
	assert!(outcomes.contains(&AttachOutcome::AlreadyTracked));
	let (session_id, target_id) = attached[0].clone();

	assert_eq!(h.relay.attach(page).await.unwrap(), AttachOutcome::AlreadyTracked);
	assert_eq!(h.backend.attach_calls(), 1);
	assert_eq!(h.relay.snapshot().attached.len(), 1);

	let frame = recv(&mut peer).await;
	assert!(is_event(&frame, ATTACHED), "{frame}");
	let params = &frame["params"]["params"];
	assert_eq!(params["sessionId"], session_id.as_str());
	assert_eq!(params["targetInfo"]["targetId"], target_id.as_str());
	assert_eq!(params["targetInfo"]["attached"], true);
	assert_eq!(params["waitingForDebugger"], false);
	assert!(peer.try_recv().is_none());
	assert_eq!(h.status.last(page), Some(PageStatus::On));
}

#[tokio::test]
async fn detach_purges_child_sessions() {
	let mut h = harness(false);
	let page = h.backend.add_page("https://example.com/");
	let mut peer = h.connect().await;
	let AttachOutcome::Attached { session_id, .. } = h.relay.attach(page).await.unwrap() else {
		panic!("page was not attached");
	};

	for child in ["child-1", "child-2"] {
		h.events
			.send(RelayEvent::Protocol {
				page,
				method: ATTACHED.to_string(),
				params: json!({ "sessionId": child, "targetInfo": { "targetId": format!("W-{child}"), "type": "worker" } }),
				session_id: None,
			})
			.unwrap();
	}
	let relay = h.relay.clone();
	eventually(|| relay.page_for_session("child-2") == Some(page)).await;
	assert_eq!(h.relay.page_for_session("child-1"), Some(page));
	assert_eq!(h.relay.snapshot().child_sessions, 2);

	assert!(h.relay.detach(page, "toggled off").await);

	assert_eq!(h.relay.page_for_session(&session_id), None);
	assert_eq!(h.relay.page_for_session("child-1"), None);
	assert_eq!(h.relay.page_for_session("child-2"), None);
	assert_eq!(h.relay.snapshot().child_sessions, 0);
	assert!(!h.backend.is_attached(page));
	assert_eq!(h.status.last(page), Some(PageStatus::Off));

	let (frame, _) = recv_until(&mut peer, |f| is_event(f, DETACHED)).await;
	assert_eq!(frame["params"]["params"]["sessionId"], session_id.as_str());
	assert_eq!(frame["params"]["params"]["reason"], "toggled off");

	// Second detach is a no-op.
	assert!(!h.relay.detach(page, "again").await);
}

#[tokio::test]
async fn reannouncement_keeps_session_identity() {
	let mut h = harness(false);
	let page = h.backend.add_page("https://example.com/");
	let peer = h.connect().await;
	let AttachOutcome::Attached { session_id, target_id } = h.relay.attach(page).await.unwrap() else {
		panic!("page was not attached");
	};

	peer.close();
	let relay = h.relay.clone();
	eventually(|| !relay.is_connected()).await;
	assert_eq!(h.status.last(page), Some(PageStatus::Reconnecting));
	assert_eq!(h.relay.session_of(page).as_deref(), Some(session_id.as_str()));

	let mut peer = h.connect().await;
	let (inventory, before) = recv_until(&mut peer, |f| is_method(f, "tabInventory")).await;

	let announcements: Vec<_> = before.iter().filter(|f| is_event(f, ATTACHED)).collect();
	assert_eq!(announcements.len(), 1, "{before:?}");
	assert_eq!(announcements[0]["params"]["params"]["sessionId"], session_id.as_str());
	assert_eq!(
		inventory["params"]["tabs"],
		json!([{ "pageId": page.0, "sessionId": session_id, "targetId": target_id }])
	);
	assert_eq!(h.relay.session_of(page).as_deref(), Some(session_id.as_str()));
	assert_eq!(h.status.last(page), Some(PageStatus::On));
	assert_eq!(h.status.reconnects(), 1);
	assert_eq!(h.backend.attach_calls(), 1);
}

#[tokio::test]
async fn reannouncement_drops_pages_lost_while_disconnected() {
	let mut h = harness(false);
	let page = h.backend.add_page("https://example.com/");
	let peer = h.connect().await;
	h.relay.attach(page).await.unwrap();

	peer.close();
	let relay = h.relay.clone();
	eventually(|| !relay.is_connected()).await;
	h.backend.lose_page(page);

	let mut peer = h.connect().await;
	let (inventory, before) = recv_until(&mut peer, |f| is_method(f, "tabInventory")).await;

	assert!(!before.iter().any(|f| is_event(f, ATTACHED)), "{before:?}");
	assert_eq!(inventory["params"]["tabs"], json!([]));
	assert_eq!(h.relay.session_of(page), None);
	assert_eq!(h.status.last(page), Some(PageStatus::Off));
}

#[tokio::test]
async fn disconnect_drops_children_but_keeps_pages() {
	let mut h = harness(false);
	let page = h.backend.add_page("https://example.com/");
	let peer = h.connect().await;
	h.relay.attach(page).await.unwrap();
	h.events
		.send(RelayEvent::Protocol {
			page,
			method: ATTACHED.to_string(),
			params: json!({ "sessionId": "child-1" }),
			session_id: None,
		})
		.unwrap();
	let relay = h.relay.clone();
	eventually(|| relay.snapshot().child_sessions == 1).await;

	peer.close();
	eventually(|| !relay.is_connected()).await;

	let snapshot = h.relay.snapshot();
	assert_eq!(snapshot.child_sessions, 0);
	assert_eq!(snapshot.attached.len(), 1);
	assert!(!snapshot.reconnect_armed);
}

#[tokio::test(start_paused = true)]
async fn always_on_reconnects_after_backoff() {
	let mut h = harness(true);
	let page = h.backend.add_page("https://example.com/");

	let mut peer = h.next_peer().await;
	let (frame, _) = recv_until(&mut peer, |f| is_event(f, ATTACHED)).await;
	let session_id = frame["params"]["params"]["sessionId"].as_str().unwrap().to_string();

	peer.close();
	let relay = h.relay.clone();
	eventually(|| relay.snapshot().reconnect_armed).await;

	let mut peer = h.next_peer().await;
	let (inventory, _) = recv_until(&mut peer, |f| is_method(f, "tabInventory")).await;
	assert_eq!(inventory["params"]["tabs"][0]["sessionId"], session_id.as_str());
	assert_eq!(h.relay.session_of(page).as_deref(), Some(session_id.as_str()));
	assert!(!h.relay.snapshot().reconnect_armed);
	assert_eq!(h.connector.handshakes(), 2);
}

#[tokio::test]
async fn explicit_attach_failure_offers_help_once() {
	let h = harness(false);
	h.connector.set_unreachable(Some("connection refused"));
	let first = h.backend.add_page("https://a.test/");
	let second = h.backend.add_page("https://b.test/");

	let err = h.relay.attach(first).await.unwrap_err();
	assert!(err.is_connect(), "{err}");
	let err = h.relay.attach(second).await.unwrap_err();
	assert!(err.is_connect(), "{err}");

	assert_eq!(h.status.history(first), vec![PageStatus::Connecting, PageStatus::Error]);
	assert_eq!(h.status.last(second), Some(PageStatus::Error));
	assert_eq!(h.status.help_shown(), 1);

	let snapshot = h.relay.snapshot();
	assert!(snapshot.attached.is_empty());
	assert!(snapshot.connecting.is_empty());
	assert!(!snapshot.reconnect_armed);
}

#[tokio::test]
async fn refused_attach_leaves_page_idle() {
	let mut h = harness(false);
	let page = h.backend.add_page("https://example.com/");
	let mut peer = h.connect().await;
	h.backend.refuse_attach(page);

	let err = h.relay.attach(page).await.unwrap_err();

	assert!(matches!(err, Error::AttachFailed { page: p, .. } if p == page), "{err}");
	assert_eq!(h.relay.session_of(page), None);
	assert_eq!(h.status.last(page), Some(PageStatus::Error));
	assert!(peer.try_recv().is_none());

	// A later attempt is allowed.
	assert!(matches!(h.relay.attach(page).await, Err(Error::AttachFailed { .. })));
	assert_eq!(h.backend.attach_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn slow_preflight_fails_as_unreachable() {
	let h = harness(false);
	h.connector.set_preflight_delay(Some(Duration::from_secs(600)));
	let started = Instant::now();

	let err = h.relay.ensure_connected().await.unwrap_err();

	assert!(matches!(err, ConnectError::Unreachable(_)), "{err}");
	assert!(started.elapsed() >= h.relay.config().preflight_timeout);
	assert!(started.elapsed() < Duration::from_secs(600));
	assert_eq!(h.connector.handshakes(), 0);
	assert!(!h.relay.is_connected());
}

#[tokio::test(start_paused = true)]
async fn stalled_handshake_fails_instead_of_hanging() {
	let h = harness(false);
	h.connector.set_handshake_delay(Some(Duration::from_secs(600)));
	let started = Instant::now();

	let err = h.relay.ensure_connected().await.unwrap_err();

	assert!(matches!(&err, ConnectError::HandshakeFailed(reason) if reason.contains("timed out")), "{err}");
	assert!(started.elapsed() >= h.relay.config().handshake_timeout);
	assert!(started.elapsed() < Duration::from_secs(600));
	assert_eq!(h.connector.handshakes(), 1);
	assert!(!h.relay.is_connected());
}

#[tokio::test(start_paused = true)]
async fn reconnect_delays_double_to_the_cap_and_reset_on_success() {
	let mut h = harness(true);
	h.connector.set_unreachable(Some("connection refused"));
	let start = Instant::now();
	let margin = Duration::from_millis(10);

	// The startup sweep makes the first attempt; each failure re-arms the timer.
	let mut at = Duration::ZERO;
	for (failed, secs) in [1u64, 2, 4, 8, 16, 30, 30].into_iter().enumerate() {
		at += Duration::from_secs(secs);
		tokio::time::sleep_until(start + at - margin).await;
		assert_eq!(h.connector.preflights(), failed + 1, "retried before {at:?}");
		tokio::time::sleep_until(start + at + margin).await;
		assert_eq!(h.connector.preflights(), failed + 2, "no retry at {at:?}");
	}

	h.connector.set_unreachable(None);
	at += Duration::from_secs(30);
	tokio::time::sleep_until(start + at + margin).await;
	let peer = h.next_peer().await;
	assert!(h.relay.is_connected());
	let attempts = h.connector.preflights();

	peer.close();
	let closed = Instant::now();
	tokio::time::sleep_until(closed + Duration::from_secs(1) - margin).await;
	assert_eq!(h.connector.preflights(), attempts);
	tokio::time::sleep_until(closed + Duration::from_secs(1) + margin).await;
	assert_eq!(h.connector.preflights(), attempts + 1);
	let _peer = h.next_peer().await;
	assert!(h.relay.is_connected());
}

#[tokio::test(start_paused = true)]
async fn always_on_attaches_open_pages_once_the_control_plane_appears() {
	let mut h = harness(true);
	h.connector.set_unreachable(Some("connection refused"));
	let page = h.backend.add_page("https://example.com/");

	let relay = h.relay.clone();
	eventually(|| relay.snapshot().reconnect_armed).await;
	assert_eq!(h.backend.attach_calls(), 0);
	assert!(!h.relay.is_connected());

	h.connector.set_unreachable(None);
	let mut peer = h.next_peer().await;
	let (frame, _) = recv_until(&mut peer, |f| is_event(f, ATTACHED)).await;

	assert_eq!(
		h.relay.session_of(page).as_deref(),
		frame["params"]["params"]["sessionId"].as_str()
	);
	assert_eq!(h.status.last(page), Some(PageStatus::On));
	assert!(h.backend.is_attached(page));
}

#[tokio::test]
async fn attach_without_target_id_is_rolled_back() {
	let mut h = harness(false);
	let page = h.backend.add_page("https://example.com/");
	let mut peer = h.connect().await;
	h.backend.blank_target(page);

	let err = h.relay.attach(page).await.unwrap_err();

	assert!(matches!(err, Error::AttachFailed { page: p, .. } if p == page), "{err}");
	assert_eq!(h.backend.attach_calls(), 1);
	assert_eq!(h.backend.detach_calls(), 1);
	assert!(!h.backend.is_attached(page));
	assert_eq!(h.relay.session_of(page), None);
	assert!(h.relay.snapshot().connecting.is_empty());
	assert_eq!(h.status.last(page), Some(PageStatus::Error));
	assert!(peer.try_recv().is_none());
}

#[tokio::test(start_paused = true)]
async fn stale_attach_leaves_the_newer_attachment_alone() {
	let mut h = harness(false);
	let page = h.backend.add_page("https://example.com/");
	let _peer = h.connect().await;
	h.backend.slow_target_info(Some(Duration::from_millis(100)));

	let relay = h.relay.clone();
	let stale = tokio::spawn(async move { relay.attach(page).await });
	let backend = h.backend.clone();
	eventually(|| backend.attach_calls() == 1).await;

	h.relay.detach(page, "detached by test").await;
	h.backend.slow_target_info(None);
	let Ok(AttachOutcome::Attached { session_id, .. }) = h.relay.attach(page).await else {
		panic!("second attach did not complete");
	};

	let err = stale.await.unwrap().unwrap_err();
	assert!(matches!(err, Error::AttachFailed { page: p, .. } if p == page), "{err}");
	assert_eq!(h.relay.session_of(page).as_deref(), Some(session_id.as_str()));
	assert!(h.backend.is_attached(page));
	assert_eq!(h.backend.detach_calls(), 1);
	assert_eq!(h.status.last(page), Some(PageStatus::On));
	assert_eq!(h.status.help_shown(), 0);
}
