// Concurrency properties of port routing
#[cfg(test)]
mod test {
    use std::{
        collections::HashMap,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use hexswitch::{
        Envelope, HandlerError, PortRegistry, RoutingError, RoutingStrategy,
        ports::handler::handler_fn,
    };
    use serde_json::Value;

    fn tagged(tag: usize) -> Arc<dyn hexswitch::Handler> {
        handler_fn(format!("h{tag}"), move |_envelope: Envelope| async move {
            let mut data = hexswitch::Payload::new();
            data.insert("tag".to_string(), Value::from(tag));
            Ok(Some(Envelope::success(data)))
        })
    }

    fn tag_of(envelope: &Envelope) -> usize {
        envelope.data.as_ref().unwrap()["tag"].as_u64().unwrap() as usize
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_round_robin_is_fair_under_concurrency() {
        const HANDLERS: usize = 3;
        const ROUNDS: usize = 100;

        let registry = Arc::new(PortRegistry::new());
        for tag in 0..HANDLERS {
            registry.register_handler_with_strategy("rr", tagged(tag), RoutingStrategy::RoundRobin);
        }

        let mut tasks = Vec::new();
        for _ in 0..HANDLERS * ROUNDS {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let results = registry.route("rr", Envelope::new("/rr")).await.unwrap();
                assert_eq!(results.len(), 1);
                tag_of(&results[0])
            }));
        }

        let mut counts: HashMap<usize, usize> = HashMap::new();
        for task in tasks {
            *counts.entry(task.await.unwrap()).or_default() += 1;
        }

        // Every cursor value is handed out exactly once, so the split is exact
        for tag in 0..HANDLERS {
            assert_eq!(counts.get(&tag), Some(&ROUNDS), "handler {tag}");
        }
        assert_eq!(registry.round_robin_cursor("rr"), Some(HANDLERS * ROUNDS));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registrations_create_every_port() {
        const PORTS: usize = 64;

        let registry = Arc::new(PortRegistry::new());
        let mut tasks = Vec::new();
        for i in 0..PORTS {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                registry.register_handler(&format!("port-{i}"), tagged(i));
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(registry.port_count(), PORTS);
        for i in 0..PORTS {
            let port = format!("port-{i}");
            assert_eq!(registry.handler_count(&port), Some(1));
            let results = registry.route(&port, Envelope::new("/")).await.unwrap();
            assert_eq!(tag_of(&results[0]), i);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registrations_on_one_port() {
        let registry = Arc::new(PortRegistry::new());
        let mut tasks = Vec::new();
        for i in 0..32 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                registry.register_handler_with_strategy(
                    "fan",
                    tagged(i),
                    RoutingStrategy::Broadcast,
                );
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let results = registry.route("fan", Envelope::new("/fan")).await.unwrap();
        assert_eq!(results.len(), 32);
    }

    #[tokio::test]
    async fn test_broadcast_isolates_failures() {
        let registry = PortRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        registry.register_handler_with_strategy("fan", tagged(0), RoutingStrategy::Broadcast);
        registry.register_handler(
            "fan",
            handler_fn("fails", |_envelope: Envelope| async move {
                Err(HandlerError::new("database unavailable"))
            }),
        );
        registry.register_handler(
            "fan",
            handler_fn("panics", |_envelope: Envelope| async move {
                if true {
                    panic!("handler bug");
                }
                Ok(None)
            }),
        );
        let counter = calls.clone();
        registry.register_handler(
            "fan",
            handler_fn("counts", move |_envelope: Envelope| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(None)
                }
            }),
        );
        registry.register_handler("fan", tagged(4));

        let results = registry.route("fan", Envelope::new("/fan")).await.unwrap();

        // One slot per handler that produced something, in registration order
        assert_eq!(results.len(), 4);
        assert_eq!(tag_of(&results[0]), 0);
        assert_eq!(results[1].status_code, 500);
        assert!(results[1].error_message.as_deref().unwrap().contains("database unavailable"));
        assert_eq!(results[2].status_code, 500);
        assert_eq!(tag_of(&results[3]), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_handler_then_success() {
        let registry = PortRegistry::new();
        assert_eq!(
            registry.route("late", Envelope::new("/")).await,
            Err(RoutingError::PortNotFound("late".to_string()))
        );

        registry.declare_port("late", RoutingStrategy::First);
        assert_eq!(
            registry.route("late", Envelope::new("/")).await,
            Err(RoutingError::NoHandler("late".to_string()))
        );

        registry.register_handler("late", tagged(9));
        let results = registry.route("late", Envelope::new("/")).await.unwrap();
        assert_eq!(tag_of(&results[0]), 9);
    }
}
