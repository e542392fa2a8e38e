//! Delivery of transformed records to the broker.

mod buffered;
mod stats;
mod stream;
mod worker;


pub use buffered::{BufferedMessage, BufferedPublisher};
pub use stats::{StatsSnapshot, StreamStats};
pub use stream::AmqpStream;
pub use worker::WORKER_THREAD_NAME;
