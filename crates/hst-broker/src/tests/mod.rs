//! Crate-level integration and BDD tests.

use std::sync::Arc;

use serde_json::{Value, json};

use crate::frame::ChannelId;
use crate::rpc::{CallContext, Fault, RpcClient, RpcHandler, serve};
use crate::test_support::linked_brokers;


struct Counter;

impl RpcHandler for Counter {
    fn handle(&self, _ctx: &CallContext, method: &str, params: Value) -> Result<Value, Fault> {
        match method {
            "len" => Ok(json!(params.as_array().map_or(0, Vec::len))),
            other => Err(Fault::unknown_method(other)),
        }
    }
}

#[test]
fn both_directions_carry_calls_in_one_session() {
    let session = linked_brokers().expect("session");
    let handler: Arc<dyn RpcHandler> = Arc::new(Counter);

    // Forward: worker serves the control channel.
    let forward_handler = Arc::clone(&handler);
    session
        .worker()
        .listen(ChannelId::CONTROL, move |c| serve(c, &forward_handler))
        .expect("listen control");

    // Reverse: host serves an allocated channel the worker dials back.
    let reverse_id = session.host().allocate().expect("allocate");
    session
        .host()
        .listen(reverse_id, move |c| serve(c, &handler))
        .expect("listen reverse");

    let forward = RpcClient::new(session.host().dial(ChannelId::CONTROL).expect("dial"))
        .expect("forward client");
    let reverse = RpcClient::new(session.worker().dial(reverse_id).expect("dial back"))
        .expect("reverse client");

    let ctx = CallContext::background();
    assert_eq!(forward.call(&ctx, "len", json!([1, 2])).expect("forward"), json!(2));
    assert_eq!(reverse.call(&ctx, "len", json!([1])).expect("reverse"), json!(1));
}
