use tokio::sync::oneshot;

use wirecall_common::RpcValue;

/// Outcome of a handler method: a result value, or an opaque error the
/// server converts into a structured exception at the boundary.
///
/// Handlers that want a specific taxonomy kind on the wire can return a
/// [`wirecall_common::RpcException`] (or a `WirecallError`) inside the
/// `anyhow::Error`; anything else becomes a `RemoteException`.
pub type HandlerResult = std::result::Result<RpcValue, anyhow::Error>;

/// An object exposed over RPC under a registered name.
///
/// `methods()` declares the public method set once, at registration time;
/// a method not listed there is unreachable over RPC even if `call` could
/// dispatch it. Methods matched by a registered async check are invoked
/// through [`call_with_completion`](Handler::call_with_completion) and must
/// fire the completion when their result is ready; everything else goes
/// through [`call`](Handler::call) and returns directly.
pub trait Handler: Send + Sync + 'static {
    /// Names of the methods callable over RPC.
    fn methods(&self) -> Vec<String>;

    /// Invokes a direct-return method.
    fn call(&self, method: &str, args: &[RpcValue]) -> HandlerResult;

    /// Invokes a completion-protocol method.
    ///
    /// The handler owns the completion from here on: it may fire it before
    /// returning, hand it to a background task, or drop it (in which case no
    /// response is ever sent and the call stays pending at the client).
    ///
    /// The default forwards to [`call`](Handler::call) and resolves
    /// immediately, so handlers without async methods need not implement it.
    fn call_with_completion(&self, method: &str, args: &[RpcValue], completion: Completion) {
        completion.resolve(self.call(method, args));
    }
}

/// One-shot completion handle for async handler methods.
///
/// Firing it more than once is impossible (it is consumed); dropping it
/// without firing leaves the response pending forever, which is the
/// completion protocol's contract, not an error.
pub struct Completion {
    tx: oneshot::Sender<HandlerResult>,
}

impl Completion {
    pub(crate) fn channel() -> (Completion, oneshot::Receiver<HandlerResult>) {
        let (tx, rx) = oneshot::channel();
        (Completion { tx }, rx)
    }

    /// Fires the completion with the method's outcome.
    pub fn resolve(self, result: HandlerResult) {
        // The receiver disappears only when the connection died; nothing
        // left to tell in that case.
        let _ = self.tx.send(result);
    }

    /// Convenience for the common success case.
    pub fn value(self, value: RpcValue) {
        self.resolve(Ok(value));
    }
}
