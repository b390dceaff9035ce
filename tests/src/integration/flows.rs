//! # Client to Server Flows
//!
//! Events sent by a client bus reach the server's handlers, in order, and a
//! client that cannot reach its server keeps working as a local bus.

#[cfg(test)]
mod tests {
    use crate::integration::fixtures::*;
    use control_bus::{EventManager, Mode, StartMode, TypedHandler, TIMER_EVENT};
    use parking_lot::Mutex;
    use rand::Rng;
    use std::sync::Arc;
    use std::time::Duration;

    // =========================================================================
    // DELIVERY
    // =========================================================================

    #[tokio::test]
    async fn test_server_receives_ping_from_client() {
        let (server, port) = start_server().await;
        let received = Collector::<String>::new();
        server.on::<Ping, _>(received.sink(|ping: &Ping| ping.payload.clone()));

        let client = start_client(port).await;
        client.send(Ping::new("x"));

        assert!(eventually(WAIT, || received.len() == 1).await);
        assert_eq!(received.snapshot(), vec!["x".to_string()]);

        client.stop().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn test_ancestor_handler_on_server_sees_remote_events() {
        let (server, port) = start_server().await;
        let probes = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&probes);
        server.on_kind(&PROBE, move |event| seen.lock().push(event.kind_name()));

        let client = start_client(port).await;
        client.send(Ping::new("a"));
        client.send(Pong {
            payload: "b".to_string(),
        });

        assert!(eventually(WAIT, || probes.lock().len() == 2).await);
        let mut kinds = probes.lock().clone();
        kinds.sort_unstable();
        assert_eq!(kinds, vec!["Ping", "Pong"]);

        client.stop().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn test_events_from_one_client_arrive_in_order() {
        let (server, port) = start_server().await;
        let received = Collector::<(u64, String)>::new();
        let handler = TypedHandler::<Ping>::new(
            received.sink(|ping: &Ping| (ping.seq, ping.payload.clone())),
        )
        .inline();
        server.register(Arc::new(handler));

        let client = start_client(port).await;
        let sent: Vec<(u64, String)> = {
            let mut rng = rand::thread_rng();
            (0..200u64)
                .map(|seq| {
                    let len = rng.gen_range(1..64);
                    let payload: String = (0..len)
                        .map(|_| char::from(rng.gen_range(b'a'..=b'z')))
                        .collect();
                    (seq, payload)
                })
                .collect()
        };
        for (seq, payload) in &sent {
            client.send(Ping {
                payload: payload.clone(),
                seq: *seq,
            });
        }

        assert!(eventually(WAIT, || received.len() == sent.len()).await);
        assert_eq!(received.snapshot(), sent);

        client.stop().await;
        server.stop().await;
    }

    // =========================================================================
    // FALLBACK
    // =========================================================================

    #[tokio::test]
    async fn test_unreachable_server_falls_back_to_local() {
        let client = EventManager::new(test_config(unused_port()));
        register_fixtures(&client);
        client
            .start(StartMode::Client {
                fallback_to_local: true,
            })
            .await
            .expect("fallback start never fails on connect");
        assert_eq!(client.mode(), Some(Mode::Local));

        let received = Collector::<String>::new();
        client.on::<Ping, _>(received.sink(|ping: &Ping| ping.payload.clone()));
        for payload in ["one", "two", "three"] {
            client.send(Ping::new(payload));
        }

        assert!(eventually(WAIT, || received.len() == 3).await);
        client.stop().await;
    }

    #[tokio::test]
    async fn test_unreachable_server_without_fallback_fails() {
        let client = EventManager::new(test_config(unused_port()));
        let result = client
            .start(StartMode::Client {
                fallback_to_local: false,
            })
            .await;
        assert!(result.is_err());
        assert!(!client.is_running());
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    #[tokio::test]
    async fn test_client_disconnect_cleans_up_server_tables() {
        let (server, port) = start_server().await;
        let client = start_client(port).await;
        client.on::<Ping, _>(|_| {});

        assert!(eventually(WAIT, || server.connection_count() == 1).await);
        assert!(eventually(WAIT, || server.forwarder_count() == 1).await);
        assert_eq!(server.connected_clients(), vec![client.manager_id()]);

        client.stop().await;

        assert!(eventually(WAIT, || server.connection_count() == 0).await);
        assert_eq!(server.forwarder_count(), 0);
        server.stop().await;
    }

    #[tokio::test]
    async fn test_server_restarts_on_new_port() {
        let (server, _) = start_server().await;
        server.stop().await;
        assert!(!server.is_running());

        server.start(StartMode::Server).await.expect("restart");
        let second_port = server.local_addr().expect("bound again").port();
        assert_ne!(second_port, 0);

        let received = Collector::<String>::new();
        server.on::<Ping, _>(received.sink(|ping: &Ping| ping.payload.clone()));
        let client = start_client(second_port).await;
        client.send(Ping::new("after restart"));
        assert!(eventually(WAIT, || received.len() == 1).await);

        client.stop().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn test_timer_keeps_ticking_after_server_is_lost() {
        let (server, port) = start_server().await;
        let client = start_client(port).await;

        let ticks = Arc::new(Mutex::new(0usize));
        let seen = Arc::clone(&ticks);
        client.on_kind(&TIMER_EVENT, move |_| *seen.lock() += 1);
        client.request_timer(Duration::from_millis(20));
        assert!(eventually(WAIT, || *ticks.lock() >= 2).await);

        server.stop().await;

        // Once the writer has failed, pings are dispatched locally.
        let (observer, local_pings) = LocalObserver::new(&PING);
        client.register(observer);
        assert!(
            eventually(WAIT, || {
                client.send(Ping::new("after loss"));
                *local_pings.lock() > 0
            })
            .await
        );

        let before = *ticks.lock();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(*ticks.lock() >= before + 3, "timer stopped with the writer");

        client.stop().await;
    }
}
