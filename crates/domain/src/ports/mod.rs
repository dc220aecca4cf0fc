use std::future::Future;
use std::pin::Pin;

pub mod index;
pub mod queue;
pub mod store;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
