//! Send/Sync guarantees for core types.

use amqp_log_stream::{
    AmqpStream, AmqpStreamBuilder, RecordTransformer, SharedFormatter, SignalSink,
    broker::memory::MemoryBroker, events::EventHub,
};
use rstest::rstest;
use static_assertions::assert_impl_all;

#[rstest]
fn builders_are_send() {
    assert_impl_all!(AmqpStreamBuilder: Send);
}

#[rstest]
fn components_are_send_sync() {
    assert_impl_all!(AmqpStream: Send, Sync);
    assert_impl_all!(RecordTransformer: Send, Sync);
    assert_impl_all!(SharedFormatter: Send, Sync);
    assert_impl_all!(EventHub: Send, Sync);
    assert_impl_all!(SignalSink: Send, Sync);
    assert_impl_all!(MemoryBroker: Send, Sync);
}
