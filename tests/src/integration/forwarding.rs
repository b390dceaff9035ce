//! # Selective Forwarding
//!
//! A client that registers a handler for a kind receives that kind when the
//! server dispatches it. Clients that did not ask never see it on their
//! connection.

#[cfg(test)]
mod tests {
    use crate::integration::fixtures::*;
    use control_bus::{EventManager, ForwardRequest, StartMode};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_only_subscribed_client_receives_forwarded_ping() {
        let (server, port) = start_server().await;

        let client_a = start_client(port).await;
        let pings_a = Collector::<String>::new();
        client_a.on::<Ping, _>(pings_a.sink(|ping: &Ping| ping.payload.clone()));

        // B subscribes to Pong only; its Ping observer never asks for forwarding.
        let client_b = start_client(port).await;
        let pongs_b = Collector::<String>::new();
        client_b.on::<Pong, _>(pongs_b.sink(|pong: &Pong| pong.payload.clone()));
        let (observer, pings_b) = LocalObserver::new(&PING);
        client_b.register(observer);

        assert!(eventually(WAIT, || server.forwarder_count() == 2).await);

        server.send(Ping::new("broadcast"));
        server.send(Pong {
            payload: "marker".to_string(),
        });

        assert!(eventually(WAIT, || pings_a.len() == 1).await);
        assert!(eventually(WAIT, || pongs_b.len() == 1).await);
        assert_eq!(pings_a.snapshot(), vec!["broadcast".to_string()]);
        assert_eq!(*pings_b.lock(), 0, "B never subscribed to Ping");

        client_a.stop().await;
        client_b.stop().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn test_repeated_subscription_installs_one_forwarder() {
        let (server, port) = start_server().await;
        let client = start_client(port).await;

        let pings = Collector::<String>::new();
        client.on::<Ping, _>(pings.sink(|ping: &Ping| ping.payload.clone()));
        client.on::<Ping, _>(|_| {});
        // A duplicate request arriving at the server is a no-op as well.
        client.send(ForwardRequest::new(client.manager_id(), "Ping"));

        assert!(eventually(WAIT, || server.forwarder_count() == 1).await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(server.forwarder_count(), 1);

        server.send(Ping::new("once"));
        assert!(eventually(WAIT, || pings.len() == 1).await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(pings.len(), 1, "one forwarder, one delivery");

        client.stop().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn test_handlers_registered_before_start_are_subscribed() {
        let (server, port) = start_server().await;

        let client = control_bus::EventManager::new(test_config(port));
        register_fixtures(&client);
        let pings = Collector::<String>::new();
        client.on::<Ping, _>(pings.sink(|ping: &Ping| ping.payload.clone()));
        client
            .start(control_bus::StartMode::Client {
                fallback_to_local: false,
            })
            .await
            .expect("client should connect");

        assert!(eventually(WAIT, || server.forwarder_count() == 1).await);
        server.send(Ping::new("early"));
        assert!(eventually(WAIT, || pings.len() == 1).await);

        client.stop().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn test_client_sees_its_own_event_echoed_by_server() {
        let (server, port) = start_server().await;
        let on_server = Collector::<String>::new();
        server.on::<Ping, _>(on_server.sink(|ping: &Ping| ping.payload.clone()));

        let client = start_client(port).await;
        let on_client = Collector::<String>::new();
        client.on::<Ping, _>(on_client.sink(|ping: &Ping| ping.payload.clone()));
        assert!(eventually(WAIT, || server.forwarder_count() == 1).await);

        client.send(Ping::new("round trip"));

        assert!(eventually(WAIT, || on_server.len() == 1).await);
        assert!(eventually(WAIT, || on_client.len() == 1).await);

        client.stop().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn test_undecodable_forward_tears_client_link_down() {
        let (server, port) = start_server().await;

        // Knows Ping but not Pong.
        let client = EventManager::new(test_config(port));
        client.register_wire_type::<Ping>();
        client
            .start(StartMode::Client {
                fallback_to_local: false,
            })
            .await
            .expect("client should connect");
        let probes = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&probes);
        client.on_kind(&PROBE, move |event| seen.lock().push(event.kind_name()));
        assert!(eventually(WAIT, || server.forwarder_count() == 1).await);

        server.send(Pong {
            payload: "unknown to the client".to_string(),
        });
        assert!(eventually(WAIT, || server.connection_count() == 0).await);
        assert_eq!(server.forwarder_count(), 0);

        client.send(Ping::new("local"));
        assert!(eventually(WAIT, || probes.lock().contains(&"Ping")).await);
        assert!(!probes.lock().contains(&"Pong"));

        client.stop().await;
        server.stop().await;
    }
}
