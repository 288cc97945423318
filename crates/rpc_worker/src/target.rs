use rpc_protocol::Value;

use crate::callback::CallbackChannel;
use crate::error::TargetError;

/// The Rust rendition of the membrane's target class (`SPEC_FULL.md`
/// AMBIENT — Rust translation of the data model). A worker binary
/// implements this trait once for the type it hosts and hands the type
/// to [`crate::WorkerRuntime::run`], which drives construction, method
/// dispatch, property snapshotting, and (optionally) event emission.
pub trait RpcTarget: Sized + Send + 'static {
    /// Builds the target from the constructor arguments carried in the
    /// spawn handshake's `Init` frame (spec.md §4.6).
    fn construct(args: Vec<Value>) -> Result<Self, TargetError>;

    /// The method names advertised in `Ready` (spec.md §4.3,
    /// `SPEC_FULL.md` SUPPLEMENT — capability advertisement). Dispatch
    /// rejects any `Request` naming a method outside this list with
    /// `UnknownMethodError` before ever calling [`RpcTarget::call`].
    fn methods() -> Vec<String>;

    /// Dispatches one call by name. `callbacks` lets the implementation
    /// invoke any `Value::Callback` argument it was passed; the returned
    /// `Err(Value)` is propagated to the caller unclassified (spec.md §7:
    /// "errors thrown by the user's method body are propagated, not
    /// classified").
    fn call(
        &mut self,
        method: &str,
        args: Vec<Value>,
        callbacks: &CallbackChannel,
    ) -> impl std::future::Future<Output = Result<Value, Value>> + Send;

    /// A snapshot of every exposed property, taken before dispatch (to
    /// seed `Ready`) and after every dispatched call (to diff against the
    /// prior snapshot and emit `PropertyUpdate`s) — the stand-in for the
    /// reference's write-interception membrane (`SPEC_FULL.md` AMBIENT).
    fn properties(&self) -> Vec<(String, Value)> {
        Vec::new()
    }

    /// Whether this target ever emits events, advertised in `Ready`.
    fn supports_events(&self) -> bool {
        false
    }

    /// Drains events the target has queued since the last call to this
    /// method. Called once after every dispatched `Request` settles, in
    /// the same pull-based style as [`RpcTarget::properties`] — there is
    /// no live push channel from target to runtime.
    fn drain_events(&mut self) -> Vec<(String, Vec<Value>)> {
        Vec::new()
    }
}
