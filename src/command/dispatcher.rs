use std::sync::Arc;

use dashmap::DashMap;

use super::{Command, CommandQueue};
use crate::observability::NodeObserver;

/// A handler invoked either inline (on the receiving thread) or after a
/// hop through a `CommandQueue` (on its consuming thread). Returns
/// `false` to signal the command was rejected — fatal for node-layer
/// commands, best-effort for custom ones (§7).
pub type Handler = Arc<dyn Fn(&Command) -> bool + Send + Sync>;

/// One dispatch-table entry: a handler plus where it runs.
#[derive(Clone)]
pub struct Route {
    pub handler: Handler,
    /// `None` means "run inline on the receiver thread" — reserved for
    /// non-blocking, non-contending handlers (§4.E).
    pub queue: Option<Arc<CommandQueue>>,
}

/// Routing table from `(type, opcode)` to a `Route` (§4.E).
///
/// The source combines multiple mixins via multiple inheritance to
/// handle both node- and object-layer commands on one type; here a
/// component that needs both simply owns two `Dispatcher`s (or
/// registers both tables into one), per the Design Notes' composition
/// replacement for that pattern.
pub struct Dispatcher {
    routes: DashMap<(u32, u32), Route>,
    observer: Arc<dyn NodeObserver>,
}

impl Dispatcher {
    pub fn new(observer: Arc<dyn NodeObserver>) -> Self {
        Self { routes: DashMap::new(), observer }
    }

    pub fn register(&self, type_id: u32, opcode: u32, handler: Handler, queue: Option<Arc<CommandQueue>>) {
        self.routes.insert((type_id, opcode), Route { handler, queue });
    }

    pub fn unregister(&self, type_id: u32, opcode: u32) {
        self.routes.remove(&(type_id, opcode));
    }

    /// Look up the route for `(command.type_id, command.opcode)` and
    /// either run it inline or push onto its target queue.
    ///
    /// 1. absent → `_cmd_unknown`: logged, dropped, never fatal.
    /// 2. `queue == None` → invoke synchronously on the calling thread.
    /// 3. otherwise → enqueue (the buffer's refcount is bumped by the
    ///    clone held in the queued `Command`) and return immediately.
    pub fn dispatch(&self, command: Command) -> bool {
        let route = self.routes.get(&(command.type_id, command.opcode)).map(|r| r.clone());
        match route {
            None => {
                self.observer.unknown_command(command.type_id, command.opcode);
                false
            }
            Some(Route { handler, queue: None }) => handler(&command),
            Some(Route { handler: _, queue: Some(queue) }) => {
                queue.push(command);
                true
            }
        }
    }

    /// Re-resolve and run a command's handler on the calling thread,
    /// regardless of its route's queue assignment. Used by a
    /// queue-consuming thread after popping a command that `dispatch`
    /// already routed there.
    pub fn invoke(&self, command: &Command) -> bool {
        match self.routes.get(&(command.type_id, command.opcode)) {
            Some(route) => (route.handler)(command),
            None => {
                self.observer.unknown_command(command.type_id, command.opcode);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Buffer;
    use crate::ids::NodeId;
    use crate::observability::TracingObserver;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn sample_command(type_id: u32, opcode: u32) -> Command {
        Command::new(type_id, opcode, Buffer::detached(0), NodeId::generate(), NodeId::generate())
    }

    #[test]
    fn unknown_command_returns_false_but_does_not_panic() {
        let d = Dispatcher::new(Arc::new(TracingObserver));
        assert!(!d.dispatch(sample_command(0, 999)));
    }

    #[test]
    fn inline_route_runs_synchronously() {
        let d = Dispatcher::new(Arc::new(TracingObserver));
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        d.register(0, 1, Arc::new(move |_c: &Command| {
            ran2.store(true, Ordering::SeqCst);
            true
        }), None);
        assert!(d.dispatch(sample_command(0, 1)));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn queued_route_defers_to_consumer() {
        let d = Dispatcher::new(Arc::new(TracingObserver));
        let queue = Arc::new(CommandQueue::new());
        d.register(1, 1, Arc::new(|_c: &Command| true), Some(queue.clone()));
        assert!(d.dispatch(sample_command(1, 1)));
        assert!(queue.try_pop().is_some());
    }
}
