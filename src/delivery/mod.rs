//! Asynchronous result delivery

pub mod sink;

pub use sink::{
    DeliverySink, DeviceRecord, ErrorDelivery, LogSink, ProgressDelivery, ResultDelivery,
};
