/// Realtime fan-out for the local backend: row-change and auth-state
/// notifications delivered to registered handlers.
pub mod dispatcher;

pub use dispatcher::Dispatcher;
