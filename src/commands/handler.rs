//! Request dispatch: command lookup, execution and the bounded queue mode

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

use super::CommandError;
use super::registry::Registry;
use crate::session::Session;
use crate::value::Value;
use crate::wire::Payload;

/// Queue depth of the single-consumer dispatch mode.
pub const REQUEST_QUEUE_CAPACITY: usize = 100;

/// Called after every successfully completed command with the command's
/// flags and the raw request body (name included). Failure of a hook
/// consumer never reaches the client.
pub type SuccessHook = Box<dyn Fn(u8, &[Value]) + Send + Sync>;

/// Resolves request bodies against the registry and runs them. Two usage
/// modes exist: direct in-caller invocation (HTTP, journal replay) and the
/// queued single-consumer mode behind [`DispatchQueue`] (TCP).
pub struct Dispatcher {
    registry: Registry,
    hooks: Vec<SuccessHook>,
}

impl Dispatcher {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            hooks: Vec::new(),
        }
    }

    pub fn add_success_hook(&mut self, hook: SuccessHook) {
        self.hooks.push(hook);
    }

    /// Resolves and runs one request body. The first item is the command
    /// name; the rest are its wire arguments.
    pub fn dispatch(&self, session: &Session, body: &[Value]) -> Result<Payload, CommandError> {
        let name_item = body.first().ok_or(CommandError::WrongNumberOfArguments)?;
        let name = name_item.as_utf8().map_err(|_| CommandError::NotStr)?;
        let command = self
            .registry
            .get(name)
            .ok_or(CommandError::UnknownCommand)?;

        let reply = command.execute(session, &body[1..])?;
        for hook in &self.hooks {
            hook(command.flags(), body);
        }
        Ok(reply)
    }
}

/// One queued invocation and the channel its reply travels back on.
pub struct Request {
    pub session: Arc<Session>,
    pub body: Vec<Value>,
    resp: oneshot::Sender<Result<Payload, CommandError>>,
}

/// Cloneable producer half of the queued dispatch mode.
#[derive(Clone)]
pub struct DispatchQueue {
    tx: mpsc::Sender<Request>,
}

impl DispatchQueue {
    /// Enqueues a request and waits for its reply. A queue or reply channel
    /// torn down by shutdown surfaces as the quit error.
    pub async fn dispatch(
        &self,
        session: Arc<Session>,
        body: Vec<Value>,
    ) -> Result<Payload, CommandError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        let request = Request {
            session,
            body,
            resp: resp_tx,
        };
        self.tx
            .send(request)
            .await
            .map_err(|_| CommandError::Quit)?;
        resp_rx.await.map_err(|_| CommandError::Quit)?
    }
}

/// Spawns the single consumer draining the bounded request queue in order;
/// returns the producer handle. The consumer stops on quit or when every
/// producer is gone.
pub fn start_queue(dispatcher: Arc<Dispatcher>, quit: watch::Receiver<bool>) -> DispatchQueue {
    let (tx, rx) = mpsc::channel(REQUEST_QUEUE_CAPACITY);
    tokio::spawn(run_queue(dispatcher, rx, quit));
    DispatchQueue { tx }
}

async fn run_queue(
    dispatcher: Arc<Dispatcher>,
    mut rx: mpsc::Receiver<Request>,
    mut quit: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = quit.changed() => {
                debug!("dispatch queue shutting down");
                return;
            }
            request = rx.recv() => {
                let Some(request) = request else { return };
                let result = dispatcher.dispatch(&request.session, &request.body);
                let _ = request.resp.send(result);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::registry::RegistryOptions;
    use crate::commands::{build_registry, flag};
    use crate::store::Storage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn body(parts: &[&str]) -> Vec<Value> {
        parts.iter().map(|s| Value::from(*s)).collect()
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(build_registry(&RegistryOptions::default()).unwrap())
    }

    #[test]
    fn test_dispatch_unknown_and_empty() {
        let d = dispatcher();
        let s = Session::new(Arc::new(Storage::new()));
        assert_eq!(
            d.dispatch(&s, &body(&["NOPE"])),
            Err(CommandError::UnknownCommand)
        );
        assert_eq!(
            d.dispatch(&s, &[]),
            Err(CommandError::WrongNumberOfArguments)
        );
    }

    #[test]
    fn test_dispatch_is_case_sensitive() {
        let d = dispatcher();
        let s = Session::new(Arc::new(Storage::new()));
        assert_eq!(
            d.dispatch(&s, &body(&["get", "k"])),
            Err(CommandError::UnknownCommand)
        );
    }

    #[test]
    fn test_success_hook_fires_only_on_success() {
        let counter = Arc::new(AtomicUsize::new(0));
        let seen_flags = Arc::new(AtomicUsize::new(0));
        let mut d = dispatcher();
        {
            let counter = counter.clone();
            let seen_flags = seen_flags.clone();
            d.add_success_hook(Box::new(move |flags, body| {
                counter.fetch_add(1, Ordering::SeqCst);
                seen_flags.store(flags as usize, Ordering::SeqCst);
                assert!(!body.is_empty());
            }));
        }
        let s = Session::new(Arc::new(Storage::new()));

        d.dispatch(&s, &body(&["SET", "k", "v"])).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(flag::has(seen_flags.load(Ordering::SeqCst) as u8, flag::WRITE));

        // failed dispatch leaves the hook untouched
        let _ = d.dispatch(&s, &body(&["SET", "k"]));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_queued_dispatch_round_trip() {
        let d = Arc::new(dispatcher());
        let (_quit_tx, quit_rx) = watch::channel(false);
        let queue = start_queue(d, quit_rx);
        let s = Arc::new(Session::new(Arc::new(Storage::new())));

        let reply = queue
            .dispatch(s.clone(), body(&["SET", "k", "v"]))
            .await
            .unwrap();
        assert_eq!(reply, Payload::Bool(true));
        let reply = queue.dispatch(s, body(&["GET", "k"])).await.unwrap();
        assert_eq!(reply, Payload::Value(Value::from("v")));
    }

    #[tokio::test]
    async fn test_quit_tears_down_pending_dispatch() {
        let d = Arc::new(dispatcher());
        let (quit_tx, quit_rx) = watch::channel(false);
        let queue = start_queue(d, quit_rx);
        let s = Arc::new(Session::new(Arc::new(Storage::new())));

        quit_tx.send(true).unwrap();
        // the consumer drains away; eventually sends observe the quit error
        let mut saw_quit = false;
        for _ in 0..50 {
            match queue.dispatch(s.clone(), body(&["KEYS"])).await {
                Err(CommandError::Quit) => {
                    saw_quit = true;
                    break;
                }
                Ok(_) => tokio::time::sleep(std::time::Duration::from_millis(2)).await,
                Err(other) => panic!("unexpected error {:?}", other),
            }
        }
        assert!(saw_quit);
    }
}
