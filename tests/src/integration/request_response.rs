//! # Request / Response Across Buses
//!
//! A client sends a returnable query, the server answers with a response
//! addressed to the client's manager id, and the client correlates the
//! answer through a `BusResponseStore`.

#[cfg(test)]
mod tests {
    use crate::integration::fixtures::*;
    use control_bus::{BusCorrelation, BusResponseStore, ResponseAddress, ResponseStore};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    /// Server answers every status query.
    fn answer_status_queries(server: &control_bus::EventManager) {
        let responder = server.clone();
        server.on::<StatusQuery, _>(move |query| {
            if let Some(address) = ResponseAddress::reply_to(&query.origin) {
                responder.send(StatusReply {
                    address,
                    healthy: query.component != "broken",
                });
            }
        });
    }

    #[tokio::test]
    async fn test_reply_is_routed_to_asking_client_and_correlated() {
        let (server, port) = start_server().await;
        answer_status_queries(&server);

        let client = start_client(port).await;
        let replies: Arc<Mutex<Vec<Arc<StatusReply>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&replies);
        client.on::<StatusReply, _>(move |reply| sink.lock().push(reply));

        let store: BusResponseStore<StatusQuery, StatusReply> =
            ResponseStore::new(BusCorrelation::new(), Duration::from_secs(30));
        let query = client.send(StatusQuery::new("scheduler"));
        let id = store.sent(Arc::clone(&query)).expect("query was stamped");
        assert!(store.registered(&id));

        assert!(eventually(WAIT, || replies.lock().len() == 1).await);
        let reply = Arc::clone(&replies.lock()[0]);
        assert_eq!(reply.address.receiver_id, client.manager_id());
        assert!(reply.healthy);

        let matched = store.received(&reply).expect("reply matches the query");
        assert!(Arc::ptr_eq(&matched, &query));
        assert!(store.received(&reply).is_none(), "second delivery is ignored");
        assert!(store.is_empty());

        client.stop().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn test_reply_reaches_only_the_asking_client() {
        let (server, port) = start_server().await;
        answer_status_queries(&server);

        let asking = start_client(port).await;
        let bystander = start_client(port).await;

        let asked = Collector::<bool>::new();
        asking.on::<StatusReply, _>(asked.sink(|reply: &StatusReply| reply.healthy));
        let overheard = Collector::<bool>::new();
        bystander.on::<StatusReply, _>(overheard.sink(|reply: &StatusReply| reply.healthy));
        assert!(eventually(WAIT, || server.forwarder_count() == 2).await);

        asking.send(StatusQuery::new("broken"));

        assert!(eventually(WAIT, || asked.len() == 1).await);
        assert_eq!(asked.snapshot(), vec![false]);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(overheard.is_empty());

        asking.stop().await;
        bystander.stop().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn test_server_does_not_dispatch_foreign_replies_locally() {
        let (server, port) = start_server().await;
        answer_status_queries(&server);
        let on_server = Collector::<bool>::new();
        server.on::<StatusReply, _>(on_server.sink(|reply: &StatusReply| reply.healthy));

        let client = start_client(port).await;
        let on_client = Collector::<bool>::new();
        client.on::<StatusReply, _>(on_client.sink(|reply: &StatusReply| reply.healthy));

        client.send(StatusQuery::new("router"));
        assert!(eventually(WAIT, || on_client.len() == 1).await);
        assert!(on_server.is_empty());

        client.stop().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn test_expired_queries_are_swept() {
        let store: BusResponseStore<StatusQuery, StatusReply> =
            ResponseStore::new(BusCorrelation::new(), Duration::from_millis(50));
        let bus = control_bus::EventManager::new(test_config(0));

        let query = bus.send(StatusQuery::new("late"));
        store.sent(Arc::clone(&query)).expect("query was stamped");
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(store.clear(), 1);
        let late = StatusReply {
            address: ResponseAddress::reply_to(&query.origin).expect("stamped"),
            healthy: true,
        };
        assert!(store.received(&late).is_none());
        bus.stop().await;
    }

    #[tokio::test]
    async fn test_async_send_from_client_is_stamped_and_delivered() {
        let (server, port) = start_server().await;
        let origins = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&origins);
        server.on::<StatusQuery, _>(move |query| sink.lock().push(query.origin));

        let client = start_client(port).await;
        let query = client.async_send(StatusQuery::new("planner"));
        assert_eq!(query.origin.sender_id, Some(client.manager_id()));
        assert!(query.origin.message_id.is_some());

        assert!(eventually(WAIT, || origins.lock().len() == 1).await);
        assert_eq!(origins.lock()[0], query.origin);

        client.stop().await;
        server.stop().await;
    }
}
